//! # Result Aggregator
//!
//! Builds the single outcome a traversal produces when it reaches a terminal state.

use chrono::Local;

use crate::core::record_store::ChainRecordStore;
use crate::core::sink::ExtractionOutcome;
use crate::core::status_table::{NodeStatus, NodeStatusTable};

/// Flattens the constituents of every stored record (node key order) and collects
/// every received node name.
pub fn aggregate(
    store: &ChainRecordStore,
    statuses: &NodeStatusTable,
    success: bool,
    message: impl Into<String>,
) -> ExtractionOutcome {
    let constituents = store
        .values()
        .flat_map(|record| record.constituents().iter().cloned())
        .collect();

    ExtractionOutcome {
        timestamp: Local::now(),
        start_name: store.start_name().to_string(),
        constituents,
        subscribed: statuses.names_with_status(NodeStatus::Received),
        success,
        message: message.into(),
    }
}
