//! Set of node names currently owned by the cleanup pipeline
//!
//! A node is claimed when it is enqueued and stays claimed while it waits in
//! the queue, while its actions run and while a retry timer is pending. Only
//! the holder of the claim may release it.

use dashmap::DashSet;

/// Concurrent claim set keyed by node name
#[derive(Debug, Default)]
pub struct InFlightSet {
    names: DashSet<String>,
}

impl InFlightSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim a node; returns false if it is already claimed
    pub fn claim(&self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    /// Release a claim; returns whether the node was claimed
    pub fn release(&self, name: &str) -> bool {
        self.names.remove(name).is_some()
    }

    /// Whether the node is currently claimed
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of claimed nodes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no node is claimed
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
