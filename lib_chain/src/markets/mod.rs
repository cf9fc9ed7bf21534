//! # Markets Module
//!
//! Feed-specific message formats. Only the streaming JSON feed is implemented.

pub mod trep;
