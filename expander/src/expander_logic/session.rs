//! # Extraction Session
//!
//! Host-side state of one run: starts the configured extraction once the login
//! is accepted, collects the outcome of every traversal and expands nested
//! chains found among the constituents, one at a time, until none is left.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use lib_chain::core::sink::{ChainEvent, ExtractionOutcome};
use lib_chain::markets::trep::chain_record::is_chain_name;
use lib_chain::markets::trep::message::{DataState, MessageType, StreamState};

use super::config::Settings;
use super::output::{describe_event, SessionReport};

/// What the host loop does next.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    Continue,
    /// Ask the dispatcher to extract `name`.
    Extract { name: String, nested: bool },
    /// Every chain has been processed.
    Finish(SessionReport),
    /// The login stream is gone.
    Stop(String),
}

/// # Extraction Session
pub struct ExtractionSession {
    item: String,
    verbose: bool,
    started_at: Option<Instant>,
    pending: VecDeque<String>,
    visited: HashSet<String>,
    report: SessionReport,
}

impl ExtractionSession {
    pub fn new(settings: &Settings) -> Self {
        Self {
            item: settings.item.clone(),
            verbose: settings.verbose,
            started_at: None,
            pending: VecDeque::new(),
            visited: HashSet::new(),
            report: SessionReport::default(),
        }
    }

    /// Reacts to one dispatcher event.
    pub fn on_event(&mut self, event: &ChainEvent) -> SessionAction {
        if let Some(text) = describe_event(event) {
            if self.verbose {
                log::info!("\n{}", text);
            } else {
                log::debug!("\n{}", text);
            }
        }

        match event {
            ChainEvent::LoginMessage { message, .. } => {
                let state = message.state.clone().unwrap_or_default();
                match message.kind {
                    MessageType::Refresh
                        if state.stream == StreamState::Open
                            && state.data != DataState::Suspect
                            && self.started_at.is_none() =>
                    {
                        log::info!("Login accepted, expanding {}", self.item);
                        self.started_at = Some(Instant::now());
                        self.visited.insert(self.item.clone());
                        SessionAction::Extract {
                            name: self.item.clone(),
                            nested: false,
                        }
                    }
                    MessageType::Status if state.stream.is_closed() => SessionAction::Stop(format!(
                        "Login stream closed: {}",
                        state.text.unwrap_or_default()
                    )),
                    _ => SessionAction::Continue,
                }
            }
            ChainEvent::Error { message, .. } => {
                log::error!("{}", message);
                SessionAction::Continue
            }
            ChainEvent::ExtractionStatus { .. } => SessionAction::Continue,
            ChainEvent::ExtractionComplete(outcome) => self.on_outcome(outcome),
        }
    }

    fn on_outcome(&mut self, outcome: &ExtractionOutcome) -> SessionAction {
        if !outcome.success {
            self.report.failures.push(outcome.message.clone());
        }
        self.report.subscribed.extend(outcome.subscribed.iter().cloned());

        for name in &outcome.constituents {
            if !is_chain_name(name) {
                self.report.constituents.push(name.clone());
            } else if self.visited.insert(name.clone()) {
                self.report.nested_chains.push(name.clone());
                self.pending.push_back(name.clone());
            } else {
                log::debug!("Nested chain {} already expanded", name);
            }
        }

        if let Some(name) = self.pending.pop_front() {
            log::info!("Expanding nested chain {} ({} more queued)", name, self.pending.len());
            return SessionAction::Extract { name, nested: true };
        }

        let mut report = std::mem::take(&mut self.report);
        report.constituents.sort();
        report.elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        SessionAction::Finish(report)
    }
}
