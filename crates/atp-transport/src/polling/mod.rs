//! Polling HTTP binding.
//!
//! The server holds invocations in a per-toolkit inbox. A loop task fetches at
//! most one item per interval and forwards it to the owner; replies go to a
//! separate respond endpoint. Fetch failures are logged and retried on the next
//! tick.

mod config;
mod transport;

pub use config::PollingConfig;
pub use transport::PollingTransport;
