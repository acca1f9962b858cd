//! # atp-transport
//!
//! Transport bindings for ATP toolkit clients.
//!
//! A toolkit exposes tools to a remote coordinating server, which pushes
//! invocations and collects results over one of two interchangeable bindings:
//!
//! - [`WebSocketTransport`]: a persistent duplex connection. The server may push
//!   at any time and the client sends replies and its own correlated requests on
//!   the same channel. Keepalive pings run on a fixed interval.
//! - [`PollingTransport`]: the client fetches at most one pending item from a
//!   server-held inbox per interval and posts replies to a separate endpoint.
//!
//! Both implement [`Transport`]. Inbound traffic is parsed into
//! [`InboundMessage`]s and delivered as [`TransportEvent`]s on the channel
//! passed to [`Transport::open`].

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod error;
pub mod events;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod polling;
pub mod protocol;
pub mod traits;
pub mod types;
pub mod websocket;

pub use error::{TransportError, TransportResult};
pub use events::TransportEvent;
pub use polling::{PollingConfig, PollingTransport};
pub use protocol::{
    AppAction, AppStart, AppTerminate, AuthResponse, InboundMessage, OutboundMessage,
    ResponseKind, ToolReply, ToolRequest, tags,
};
pub use traits::Transport;
pub use types::{Credentials, TransportType};
pub use websocket::{WebSocketConfig, WebSocketTransport};
