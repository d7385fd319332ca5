//! Shared structural configuration
//!
//! The membership state that structural operations are applied to.

use std::collections::BTreeMap;

/// Identity of a node: stable id plus a display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdentity {
    pub id: String,
    pub name: String,
}

impl NodeIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Per-node entry in the shared configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfiguration {
    pub identity: NodeIdentity,
}

/// Nodes currently part of the cluster, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedConfiguration {
    nodes: BTreeMap<String, NodeConfiguration>,
    /// Bumped on every effective change
    version: u64,
}

impl SharedConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. `false` if a node with the same id is already present.
    pub fn add_node(&mut self, identity: NodeIdentity) -> bool {
        if self.nodes.contains_key(&identity.id) {
            return false;
        }
        self.nodes
            .insert(identity.id.clone(), NodeConfiguration { identity });
        self.version += 1;
        true
    }

    /// Remove a node by id. `false` if it was not present.
    pub fn remove_node(&mut self, identity: &NodeIdentity) -> bool {
        let removed = self.nodes.remove(&identity.id).is_some();
        if removed {
            self.version += 1;
        }
        removed
    }

    pub fn contains(&self, identity: &NodeIdentity) -> bool {
        self.nodes.contains_key(&identity.id)
    }

    /// Nodes ordered by id
    pub fn nodes(&self) -> impl Iterator<Item = &NodeConfiguration> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}
