//! Transport event types.

use crate::protocol::InboundMessage;

/// Events a binding delivers to its owner over the channel supplied at `open`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A parsed inbound protocol message.
    Message(InboundMessage),

    /// The underlying connection ended. No further events follow for this opening.
    Closed {
        /// An optional reason for the disconnection.
        reason: Option<String>,
    },
}

impl TransportEvent {
    /// Shorthand for a `Closed` event carrying a reason.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: Some(reason.into()),
        }
    }
}
