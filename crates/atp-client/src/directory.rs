//! Named toolkit clients served by the HTTP routing layer.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::info;

use crate::toolkit::ToolkitClient;

/// An explicit, shareable set of toolkit clients keyed by toolkit name.
#[derive(Debug, Default)]
pub struct ToolkitDirectory {
    clients: RwLock<BTreeMap<String, ToolkitClient>>,
}

impl ToolkitDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client under `name`, returning the client it replaced.
    pub fn insert(&self, name: impl Into<String>, client: ToolkitClient) -> Option<ToolkitClient> {
        let name = name.into();
        info!(toolkit = %name, app_name = %client.app_name(), "Toolkit added to directory");
        self.clients.write().insert(name, client)
    }

    /// The client registered under `name`.
    pub fn get(&self, name: &str) -> Option<ToolkitClient> {
        self.clients.read().get(name).cloned()
    }

    /// Remove a client.
    pub fn remove(&self, name: &str) -> Option<ToolkitClient> {
        self.clients.write().remove(name)
    }

    /// Registered toolkit names, in order.
    pub fn names(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }

    /// Number of toolkits.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}
