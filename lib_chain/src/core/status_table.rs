//! # Node Status Table
//!
//! Every node name the engine has ever asked for (or received unasked) lives here
//! with its resolution status. Entries only move forward: `Waiting` to `Received`
//! or `NotFound`, once. Re-delivered responses are no-ops.

use std::collections::BTreeMap;

use crate::core::node_key::NodeKey;

/// Resolution status of a node request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Requested, no answer yet.
    Waiting,
    /// A refresh arrived for the node.
    Received,
    /// The stream was closed by the server (item not found, not entitled, ...).
    NotFound,
}

impl NodeStatus {
    /// `true` for `Received` and `NotFound`.
    pub fn is_resolved(self) -> bool {
        !matches!(self, NodeStatus::Waiting)
    }
}

/// # Node Status Table
#[derive(Debug, Default)]
pub struct NodeStatusTable {
    entries: BTreeMap<NodeKey, NodeStatus>,
}

impl NodeStatusTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `name` as `Waiting` unless it is already known.
    ///
    /// Returns `true` when the name was newly declared.
    pub fn declare(&mut self, name: &str) -> bool {
        let key = NodeKey::from(name);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, NodeStatus::Waiting);
        true
    }

    /// Records a final status for `name`, inserting it when absent.
    ///
    /// Returns `true` when the status changed. A resolved entry is never
    /// overwritten and `Waiting` is not accepted as a resolution.
    pub fn resolve(&mut self, name: &str, status: NodeStatus) -> bool {
        if !status.is_resolved() {
            log::warn!("Ignoring attempt to resolve {} back to Waiting", name);
            return false;
        }
        let entry = self.entries.entry(NodeKey::from(name)).or_insert(NodeStatus::Waiting);
        if entry.is_resolved() {
            return false;
        }
        *entry = status;
        true
    }

    /// Status of `name`, if declared.
    pub fn status(&self, name: &str) -> Option<NodeStatus> {
        self.entries.get(&NodeKey::from(name)).copied()
    }

    /// Whether `name` has been declared.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&NodeKey::from(name))
    }

    /// `true` iff no entry is `Waiting`.
    pub fn all_resolved(&self) -> bool {
        self.entries.values().all(|s| s.is_resolved())
    }

    /// Names with `status`, in node key order.
    pub fn names_with_status(&self, status: NodeStatus) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(k, _)| k.name().to_string())
            .collect()
    }

    /// Number of names with `status`.
    pub fn count(&self, status: NodeStatus) -> usize {
        self.entries.values().filter(|s| **s == status).count()
    }

    /// The `Received` name with the greatest node key.
    pub fn last_received(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(_, s)| **s == NodeStatus::Received)
            .map(|(k, _)| k.name())
    }

    /// Number of declared names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing has been declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every entry. Only used when a new traversal starts or one is aborted.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
