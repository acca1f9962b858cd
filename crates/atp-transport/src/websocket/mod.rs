//! Duplex websocket binding.
//!
//! One persistent connection carries both server-pushed invocations and the
//! client's own outbound traffic. A reader task forwards parsed frames to the
//! owner's event channel and a keepalive task pings on a fixed interval.

mod config;
mod tasks;
mod transport;

pub use config::{API_KEY_PLACEHOLDER, LLM_CLIENT_PATH, TOOLKIT_PATH, WebSocketConfig};
pub use transport::WebSocketTransport;
