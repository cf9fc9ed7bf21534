//! # Sinks and Host Events
//!
//! The engine never talks to a socket. It hands outbound requests to a
//! [`RequestSink`] and reports to the host through an [`EventSink`]. Both are
//! implemented for unbounded tokio channels (the dispatcher wiring) and for `Vec`
//! (tests and offline replay), so a send never blocks the caller.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::error::ChainError;
use crate::markets::trep::message::{Envelope, OutboundRequest};

/// Final result of one traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionOutcome {
    pub timestamp: DateTime<Local>,
    /// Name the traversal started from.
    pub start_name: String,
    /// Leaf names of every stored record, in node order.
    pub constituents: Vec<String>,
    /// Every node name that was received.
    pub subscribed: Vec<String>,
    pub success: bool,
    pub message: String,
}

/// The four kinds of notification a host receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    /// A traversal reached `Completed` or `Failed`.
    ExtractionComplete(ExtractionOutcome),
    /// A market-data status message observed during a sequential traversal.
    ExtractionStatus {
        timestamp: DateTime<Local>,
        status: Envelope,
    },
    /// Any message on the login stream.
    LoginMessage {
        timestamp: DateTime<Local>,
        message: Envelope,
    },
    /// Protocol, decoding or transport error.
    Error {
        timestamp: DateTime<Local>,
        message: String,
    },
}

impl ChainEvent {
    /// Error event stamped with the current local time.
    pub fn error(message: impl Into<String>) -> Self {
        ChainEvent::Error {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

/// Destination of outbound requests.
pub trait RequestSink {
    /// Queues `request` for sending. Must not block.
    fn send_request(&mut self, request: OutboundRequest) -> Result<(), ChainError>;
}

/// Destination of host events.
pub trait EventSink {
    /// Delivers `event`. Must not block.
    fn emit(&mut self, event: ChainEvent);
}

impl RequestSink for Vec<OutboundRequest> {
    fn send_request(&mut self, request: OutboundRequest) -> Result<(), ChainError> {
        self.push(request);
        Ok(())
    }
}

impl RequestSink for mpsc::UnboundedSender<OutboundRequest> {
    fn send_request(&mut self, request: OutboundRequest) -> Result<(), ChainError> {
        self.send(request).map_err(|_| ChainError::ChannelClosed("outbound requests"))
    }
}

impl EventSink for Vec<ChainEvent> {
    fn emit(&mut self, event: ChainEvent) {
        self.push(event);
    }
}

impl EventSink for mpsc::UnboundedSender<ChainEvent> {
    fn emit(&mut self, event: ChainEvent) {
        if self.send(event).is_err() {
            log::warn!("Host event channel closed, dropping event.");
        }
    }
}
