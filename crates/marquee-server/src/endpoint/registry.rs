//! Per-port ordered endpoint lists.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::Endpoint;
use crate::errors::{GatewayError, Result};

/// Endpoints registered on each port, in registration order.
///
/// Accept loops read it while registration writes it.
#[derive(Default)]
pub(crate) struct EndpointRegistry {
    by_port: RwLock<HashMap<u16, Vec<Endpoint>>>,
}

impl EndpointRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether `(port, path)` is taken.
    pub(crate) fn contains(&self, port: u16, path: &str) -> bool {
        self.by_port
            .read()
            .get(&port)
            .is_some_and(|list| list.iter().any(|e| e.path() == path))
    }

    /// Append an endpoint; `(port, path)` must be free.
    pub(crate) fn insert(&self, endpoint: Endpoint) -> Result<()> {
        let mut by_port = self.by_port.write();
        let list = by_port.entry(endpoint.port()).or_default();
        if list.iter().any(|e| e.path() == endpoint.path()) {
            return Err(GatewayError::DuplicateEndpoint {
                port: endpoint.port(),
                path: endpoint.path().to_owned(),
            });
        }
        list.push(endpoint);
        Ok(())
    }

    /// First endpoint on `port` whose path equals `path` exactly.
    pub(crate) fn find(&self, port: u16, path: &str) -> Option<Endpoint> {
        self.by_port
            .read()
            .get(&port)?
            .iter()
            .find(|e| e.path() == path)
            .cloned()
    }

    /// Remove and return the endpoint at `(port, path)`.
    pub(crate) fn remove(&self, port: u16, path: &str) -> Option<Endpoint> {
        let mut by_port = self.by_port.write();
        let list = by_port.get_mut(&port)?;
        let index = list.iter().position(|e| e.path() == path)?;
        let endpoint = list.remove(index);
        if list.is_empty() {
            let _ = by_port.remove(&port);
        }
        Some(endpoint)
    }

    /// Registered paths on `port`, in registration order.
    pub(crate) fn paths(&self, port: u16) -> Vec<String> {
        self.by_port
            .read()
            .get(&port)
            .map(|list| list.iter().map(|e| e.path().to_owned()).collect())
            .unwrap_or_default()
    }

    /// Remove every endpoint, returning them.
    pub(crate) fn clear(&self) -> Vec<Endpoint> {
        self.by_port
            .write()
            .drain()
            .flat_map(|(_, list)| list)
            .collect()
    }

    /// Total endpoints across all ports.
    pub(crate) fn len(&self) -> usize {
        self.by_port.read().values().map(Vec::len).sum()
    }
}
