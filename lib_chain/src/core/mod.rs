//! # Core Extraction Module
//!
//! Everything needed to discover a chain except the socket itself.
//!
//! ## Core Components:
//!
//! - **`node_key`** and **`status_table`**: node name ordering and the
//!   per-name request lifecycle (`Waiting`, `Received`, `NotFound`).
//! - **`record_store`**: decoded chain records keyed by node name.
//! - **`engine`**: the traversal state machine, sequential or heuristic.
//! - **`aggregator`**: turns a terminal state into an `ExtractionOutcome`.
//! - **`router`**: decodes frames and feeds the engine.
//! - **`dispatcher`**: the single async task owning the router.
//! - **`sink`**: the seams between the engine, the transport and the host.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Builds the outcome of a finished traversal.
pub mod aggregator;
/// The async task that owns the router.
pub mod dispatcher;
/// The traversal state machine.
pub mod engine;
/// Errors raised while decoding or routing.
pub mod error;
/// Node name ordering and index radix.
pub mod node_key;
/// Decoded chain records by node name.
pub mod record_store;
/// Frame decoding and routing to the engine.
pub mod router;
/// Request and event seams.
pub mod sink;
/// Per-name request status.
pub mod status_table;

// --- Public API Re-exports ---
pub use aggregator::aggregate;
pub use dispatcher::{ChainDispatcher, DispatcherCommand};
pub use engine::{Strategy, TraversalConfig, TraversalEngine, TraversalPhase};
pub use error::ChainError;
pub use node_key::{NodeKey, Radix};
pub use record_store::ChainRecordStore;
pub use router::MessageRouter;
pub use sink::{ChainEvent, EventSink, ExtractionOutcome, RequestSink};
pub use status_table::{NodeStatus, NodeStatusTable};
