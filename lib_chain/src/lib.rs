//! # lib_chain
//!
//! Chain discovery for real-time market-data feeds. A chain is a linked list of
//! records whose link slots name the constituents of an index or a market list.
//! The `core` module walks such a list given its start name; `ingestors` (feature
//! gated) connects the walk to a live WebSocket server.

pub mod core;
pub mod markets;

#[cfg(feature = "ingestors")]
pub mod ingestors;
