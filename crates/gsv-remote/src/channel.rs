//! The remote administrative channel.
//!
//! The server's console protocol does not tolerate concurrent sessions.
//! [`RemoteCommandChannel`] opens a fresh session for every command:
//!
//! 1. wait for the single permit
//! 2. connect and authenticate with the shared secret
//! 3. run the command and collect the response
//! 4. disconnect and release the permit
//!
//! Every failure is logged and turned into `None`, never propagated. The
//! supervisor treats a channel that never authenticated as absent and falls
//! back to stopping the process directly.

use crate::error::{RemoteError, RemoteResult};
use crate::transport::{RemoteEndpoint, RemoteSession, RemoteTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Handshake attempts used by the supervisor unless configured otherwise.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
/// Pause between failed handshake attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Serialized administrative channel.
///
/// At most one session is open at any time; callers queue on a single
/// permit which is released on every return path.
///
/// # Example
/// ```
/// use gsv_remote::{commands, RemoteCommandChannel, RemoteEndpoint, UnavailableTransport};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let endpoint = RemoteEndpoint::new("127.0.0.1", 25575, "secret");
/// let channel = RemoteCommandChannel::new(Arc::new(UnavailableTransport), endpoint);
///
/// assert!(!channel.connect(2, Duration::from_millis(1)).await);
/// assert_eq!(channel.execute(&commands::info(), false).await, None);
/// # }
/// ```
pub struct RemoteCommandChannel {
    transport: Arc<dyn RemoteTransport>,
    endpoint: RemoteEndpoint,
    permit: Semaphore,
    authenticated: AtomicBool,
}

impl RemoteCommandChannel {
    /// Create an unauthenticated channel. Nothing is opened until [`connect`](Self::connect).
    pub fn new(transport: Arc<dyn RemoteTransport>, endpoint: RemoteEndpoint) -> Self {
        Self {
            transport,
            endpoint,
            permit: Semaphore::new(1),
            authenticated: AtomicBool::new(false),
        }
    }

    /// Endpoint every session is opened against.
    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    /// Whether the last [`connect`](Self::connect) completed a handshake.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Try to authenticate up to `attempts` times, `delay` apart.
    ///
    /// Returns whether a handshake succeeded. A failed run leaves the channel
    /// unauthenticated until the next call.
    pub async fn connect(&self, attempts: u32, delay: Duration) -> bool {
        self.authenticated.store(false, Ordering::SeqCst);
        let address = self.endpoint.address();

        for attempt in 1..=attempts {
            match self.handshake().await {
                Ok(()) => {
                    info!("Remote channel authenticated with {} (attempt {}/{})", address, attempt, attempts);
                    self.authenticated.store(true, Ordering::SeqCst);
                    return true;
                }
                Err(e) => {
                    warn!("Remote connect attempt {}/{} failed: {}", attempt, attempts, e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        error!("Remote channel to {} unavailable after {} attempts", address, attempts);
        false
    }

    /// Run one command in its own session.
    ///
    /// Returns `None` when the command was not delivered: the channel is not
    /// authenticated or any step of the session failed.
    pub async fn execute(&self, command: &str, multi_packet: bool) -> Option<String> {
        if !self.is_authenticated() {
            debug!("Skipping remote command {:?}: channel not authenticated", command);
            return None;
        }

        let _permit = self.permit.acquire().await.ok()?;
        match self.run_command(command, multi_packet).await {
            Ok(response) => {
                debug!("Remote command {:?} -> {:?}", command, response);
                Some(response)
            }
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Open and close one authenticated session.
    async fn handshake(&self) -> RemoteResult<()> {
        let _permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| RemoteError::unavailable("channel closed"))?;

        let mut session = self.open_session().await?;
        close_session(session.as_mut()).await;
        Ok(())
    }

    async fn run_command(&self, command: &str, multi_packet: bool) -> RemoteResult<String> {
        let mut session = self.open_session().await?;
        let result = session
            .execute(command, multi_packet)
            .await
            .map_err(|e| RemoteError::execute(command, e.to_string()));
        close_session(session.as_mut()).await;
        result
    }

    /// Connect and authenticate. The session is closed again on failure.
    async fn open_session(&self) -> RemoteResult<Box<dyn RemoteSession>> {
        let mut session = self.transport.connect(&self.endpoint).await?;

        match session.authenticate(&self.endpoint.secret).await {
            Ok(true) => Ok(session),
            Ok(false) => {
                close_session(session.as_mut()).await;
                Err(RemoteError::Auth {
                    endpoint: self.endpoint.address(),
                })
            }
            Err(e) => {
                close_session(session.as_mut()).await;
                Err(e)
            }
        }
    }
}

async fn close_session(session: &mut dyn RemoteSession) {
    if let Err(e) = session.disconnect().await {
        debug!("{}", e);
    }
}

impl std::fmt::Debug for RemoteCommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCommandChannel")
            .field("endpoint", &self.endpoint)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
