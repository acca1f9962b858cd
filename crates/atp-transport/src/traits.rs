//! Core transport traits.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportResult;
use crate::events::TransportEvent;
use crate::protocol::OutboundMessage;
use crate::types::{Credentials, TransportType};

/// The contract shared by the duplex and polling bindings.
///
/// A binding is opened with credentials and an event sink. Everything the peer
/// pushes, plus the eventual `Closed` notification, arrives on that sink; the
/// sink is the binding's receive callback. A binding may be reopened after it
/// closes.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Returns the type of this transport.
    fn transport_type(&self) -> TransportType;

    /// Establishes the binding and starts delivering events to `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote endpoint cannot be reached or the binding
    /// is misconfigured.
    async fn open(
        &self,
        credentials: &Credentials,
        events: mpsc::Sender<TransportEvent>,
    ) -> TransportResult<()>;

    /// Sends a single message.
    ///
    /// # Errors
    ///
    /// Duplex bindings fail fast with [`crate::TransportError::NotConnected`] when
    /// closed. Polling bindings report HTTP failures to the caller.
    async fn send(&self, message: &OutboundMessage) -> TransportResult<()>;

    /// Closes the binding and stops its background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error only if a background task could not be joined cleanly.
    async fn close(&self) -> TransportResult<()>;

    /// Returns `true` while the binding is open.
    fn is_open(&self) -> bool;

    /// Whether the peer expects an `auth` message before it will confirm the connection.
    fn requires_handshake(&self) -> bool {
        true
    }

    /// Returns the endpoint address for this binding, if applicable.
    fn endpoint(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ensure the trait stays usable behind a pointer.
    fn _assert_object_safe(_t: &dyn Transport) {}
}
