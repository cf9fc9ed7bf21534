//! # Data Ingestors Module
//!
//! Network clients that feed the [`ChainDispatcher`](crate::core::dispatcher::ChainDispatcher).
//!
//! ## Contained Modules:
//! - **`trep_wss`**: WebSocket client for the streaming JSON feed (`tr_json2`),
//!   with connection retry and separate reader and writer halves.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The WebSocket client for the streaming JSON feed.
pub mod trep_wss;

// --- Public API Re-exports ---
pub use trep_wss::{connect_with_retry, TrepConfig, TrepWssTransport};
