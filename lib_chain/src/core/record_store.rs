//! # Chain Record Store
//!
//! Holds the decoded record of every node that resolved to a known chain shape,
//! ordered by [`NodeKey`], together with the name the traversal started from.

use std::collections::BTreeMap;

use crate::core::node_key::NodeKey;
use crate::markets::trep::chain_record::ChainRecord;

/// # Chain State
#[derive(Debug, Default)]
pub struct ChainRecordStore {
    start_name: String,
    records: BTreeMap<NodeKey, ChainRecord>,
}

impl ChainRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empties the store and remembers the new start name.
    pub fn reset(&mut self, start_name: &str) {
        self.records.clear();
        self.start_name = start_name.to_string();
    }

    pub fn start_name(&self) -> &str {
        &self.start_name
    }

    /// Stores `record` under `name`. `Invalid` records are refused.
    pub fn put(&mut self, name: &str, record: ChainRecord) -> bool {
        if !record.is_valid() {
            return false;
        }
        self.records.insert(NodeKey::from(name), record);
        true
    }

    pub fn get(&self, name: &str) -> Option<&ChainRecord> {
        self.records.get(&NodeKey::from(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(&NodeKey::from(name))
    }

    /// Records in node key order.
    pub fn values(&self) -> impl Iterator<Item = &ChainRecord> {
        self.records.values()
    }

    /// `(name, record)` pairs in node key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChainRecord)> {
        self.records.iter().map(|(k, r)| (k.name(), r))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Some stored record is flagged first.
    pub fn has_first(&self) -> bool {
        self.records.values().any(ChainRecord::is_first)
    }

    /// Some stored record is flagged last.
    pub fn has_last(&self) -> bool {
        self.records.values().any(ChainRecord::is_last)
    }
}
