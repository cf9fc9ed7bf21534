//! # Streaming JSON Feed
//!
//! Wire messages and chain record decoding for the `tr_json2` WebSocket API.

pub mod chain_record;
pub mod message;

pub use chain_record::{is_chain_name, ChainRecord, ChainShape};
pub use message::{Envelope, OutboundRequest};
