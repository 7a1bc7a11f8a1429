//! # GSV Remote
//!
//! Administrative command channel to the supervised server.
//!
//! Every command runs in its own connect, authenticate, execute, disconnect
//! session, and sessions never overlap. The wire protocol itself lives
//! behind [`RemoteTransport`].

pub mod channel;
pub mod commands;
pub mod error;
pub mod transport;

pub use channel::{RemoteCommandChannel, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use error::{RemoteError, RemoteResult};
pub use transport::{RemoteEndpoint, RemoteSession, RemoteTransport, UnavailableTransport};
