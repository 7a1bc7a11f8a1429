//! Transport seam for the administrative protocol.
//!
//! The wire protocol itself lives outside this workspace. Deployments plug a
//! [`RemoteTransport`] into the supervisor; tests use scripted ones.

use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use std::fmt;

/// Where the server listens for administrative sessions, and the shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Host name or address, usually loopback.
    pub host: String,
    /// Administrative port from the server settings.
    pub port: u16,
    /// Shared secret. Never printed by `Debug`.
    pub secret: String,
}

impl RemoteEndpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16, secret: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            secret: secret.into(),
        }
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One open administrative session.
#[async_trait]
pub trait RemoteSession: Send {
    /// Returns `Ok(false)` when the server rejects the secret.
    async fn authenticate(&mut self, secret: &str) -> RemoteResult<bool>;

    /// Run one command. `multi_packet` asks the transport to collect a
    /// response that spans several packets.
    async fn execute(&mut self, command: &str, multi_packet: bool) -> RemoteResult<String>;

    /// Close the session. The session is not used afterwards.
    async fn disconnect(&mut self) -> RemoteResult<()>;
}

/// Opens sessions to an endpoint.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Open a session. Authentication is a separate step.
    async fn connect(&self, endpoint: &RemoteEndpoint) -> RemoteResult<Box<dyn RemoteSession>>;
}

/// Transport for deployments without a remote protocol: every connect fails,
/// so the supervisor runs in forced-stop mode.
#[derive(Debug, Default, Clone)]
pub struct UnavailableTransport;

#[async_trait]
impl RemoteTransport for UnavailableTransport {
    async fn connect(&self, endpoint: &RemoteEndpoint) -> RemoteResult<Box<dyn RemoteSession>> {
        Err(RemoteError::unavailable(format!(
            "no remote transport configured for {}",
            endpoint.address()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_debug_hides_secret() {
        let endpoint = RemoteEndpoint::new("127.0.0.1", 25575, "hunter2");
        let rendered = format!("{:?}", endpoint);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(endpoint.address(), "127.0.0.1:25575");
    }

    #[tokio::test]
    async fn test_unavailable_transport_never_connects() {
        let endpoint = RemoteEndpoint::new("127.0.0.1", 25575, "secret");
        let result = UnavailableTransport.connect(&endpoint).await;
        assert!(matches!(result, Err(RemoteError::Unavailable { .. })));
    }
}
