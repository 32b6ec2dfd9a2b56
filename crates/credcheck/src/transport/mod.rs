//! Transport abstraction over an asynchronous MQTT session.
//!
//! A [`Transport`] owns the network connection and reports everything that
//! happens on it to one registered [`EventHandler`]. Handlers get a
//! [`Session`] to issue follow-up requests from inside the callback; those
//! requests are queued, never awaited, so a callback cannot stall the
//! connection that delivered it.

mod mqtt;

pub use mqtt::MqttTransport;

use crate::error::{CredcheckError, Result};
use crate::outcome::ResponseEnvelope;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Per-filter result carried in a SUBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeGrant {
    Granted(u8),
    Rejected,
}

impl SubscribeGrant {
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnAckInfo {
    pub session_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client asked for the disconnect.
    ClientInitiated,
    /// The server closed the connection.
    ServerClosed,
    NetworkError(String),
}

impl DisconnectReason {
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::ClientInitiated)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientInitiated => f.write_str("client initiated"),
            Self::ServerClosed => f.write_str("closed by server"),
            Self::NetworkError(e) => write!(f, "network error: {e}"),
        }
    }
}

/// Requests a handler may issue on the live session. All at QoS 1.
pub trait Session: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the request cannot be queued.
    fn subscribe(&self, filter: &str) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the request cannot be queued.
    fn unsubscribe(&self, filter: &str) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the request cannot be queued.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the request cannot be queued.
    fn disconnect(&self) -> Result<()>;
}

/// Receives the five event kinds a transport reports.
///
/// Called from the transport's background task; implementations must not block.
pub trait EventHandler: Send + Sync {
    fn on_connect(&self, session: &dyn Session, result: std::result::Result<ConnAckInfo, CredcheckError>);

    fn on_subscribe(&self, session: &dyn Session, grants: &[SubscribeGrant]);

    fn on_publish(&self, session: &dyn Session, packet_id: u16);

    fn on_message(&self, session: &dyn Session, message: ResponseEnvelope);

    fn on_disconnect(&self, reason: DisconnectReason);
}

pub trait Transport: Send + Sync {
    /// Registers the single handler for all subsequent sessions.
    fn set_handler(&self, handler: Arc<dyn EventHandler>);

    /// Starts a new session in the background. The outcome is reported
    /// through [`EventHandler::on_connect`].
    ///
    /// # Errors
    ///
    /// Returns an error if no handler is registered, a session is already
    /// active, or no async runtime is available.
    fn connect(&self) -> Result<()>;

    /// Best-effort disconnect of the active session, if any.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Disconnects and waits for the background task to finish.
    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}
