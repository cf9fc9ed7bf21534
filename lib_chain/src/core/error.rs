//! # Chain Errors
//!
//! A single error type shared by the engine, the router, the dispatcher and the
//! transport. Envelope-level failures never stop the dispatcher; they are turned
//! into `ChainEvent::Error` and processing continues with the next envelope.

use thiserror::Error;

/// Errors raised while decoding envelopes, starting traversals or moving requests.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The inbound frame is not valid JSON or does not match the envelope schema.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[from] serde_json::Error),

    /// The `Type` attribute names a message kind this client does not know.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// The `Domain` attribute names a domain model this client does not handle.
    #[error("Received response message for unhandled domain model {0}")]
    UnsupportedDomain(String),

    /// The chain name handed to `start` can never be requested.
    #[error("{0} is an invalid chain name")]
    InvalidStartName(String),

    /// The queue on the other side of a sink or command channel was dropped.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// The WebSocket layer failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The configured server address could not be parsed.
    #[error("Invalid server url: {0}")]
    Url(String),
}
