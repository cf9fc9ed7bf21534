//! # Traversal Engine
//!
//! The state machine that walks a chain. It is purely reactive: `start` issues the
//! first request, and every later transition is driven by one refresh or status
//! message handed in by the router. Requests go out through a [`RequestSink`] and
//! the terminal outcome through an [`EventSink`]; responses are correlated by node
//! name only, so they may arrive in any order.
//!
//! ## Strategies
//!
//! - **Sequential** follows `next`/`prev` pointers one hop at a time, in both
//!   directions. Any node that can not be retrieved ends the traversal.
//! - **Heuristic** requests a probe batch first. Which straddling pair of probe
//!   indices is entirely absent tells the index radix and a safe batch width; the
//!   chain is then requested in contiguous index ranges until a first and a last
//!   node have both been seen.

use std::time::{Duration, Instant};

use log::Level;
use serde_json::{Map, Value};

use crate::core::aggregator::aggregate;
use crate::core::error::ChainError;
use crate::core::node_key::{split_node_name, Radix};
use crate::core::record_store::ChainRecordStore;
use crate::core::sink::{ChainEvent, EventSink, RequestSink};
use crate::core::status_table::{NodeStatus, NodeStatusTable};
use crate::markets::trep::chain_record::ChainRecord;
use crate::markets::trep::message::{OutboundRequest, State};

/// First request identifier used for item streams. Lower ids belong to the login.
pub const FIRST_ITEM_STREAM_ID: i64 = 5;

/// Step used when no probe pair is entirely absent.
pub const FALLBACK_STEP: u32 = 1500;

/// Decimal probes `0..=10` are always requested; these are added on top.
const HEX_PROBES: [&str; 9] = ["A", "60", "3C", "95", "5F", "1F4", "500", "3E8", "1000"];

/// Probe pairs in priority order with the step each one implies when both are missing.
const PROBE_PAIRS: [(&str, &str, u32); 5] = [
    ("A", "10", 10),
    ("60", "3C", 50),
    ("95", "5F", 90),
    ("1F4", "500", 500),
    ("3E8", "1000", 1000),
];

/// Upper bound on consecutive ranges that contain only already-declared names.
const MAX_EMPTY_RANGES: u32 = 1000;

/// Traversal strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Heuristic,
    Sequential,
}

/// Parameters of one traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalConfig {
    pub strategy: Strategy,
    /// First index of the first expansion range.
    pub start_index: u32,
    /// Last index of the first expansion range when the batch size is fixed.
    pub stop_index: u32,
    /// Fixed batch size, `0` to detect it from the probe batch.
    pub batch_size: u32,
    /// Log per-record progress at `info` instead of `debug`.
    pub verbose: bool,
    /// Fail the traversal when no response arrives for this long while names are waiting.
    pub waiting_timeout: Option<Duration>,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Heuristic,
            start_index: 0,
            stop_index: 50,
            batch_size: 0,
            verbose: false,
            waiting_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl TraversalConfig {
    /// Same configuration with another strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Lifecycle of a traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalPhase {
    Idle,
    /// Heuristic probe batch outstanding.
    Probing,
    Expanding,
    Completed,
    Failed(String),
}

impl TraversalPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TraversalPhase::Completed | TraversalPhase::Failed(_))
    }
}

/// Per-traversal parameters and heuristic progress.
#[derive(Debug, Clone)]
struct TraversalContext {
    config: TraversalConfig,
    base: String,
    radix: Radix,
    step: u32,
    range_start: u32,
    range_stop: u32,
    /// Bounds of the last requested range and the `Received` count when it went out.
    last_range: Option<(u32, u32, usize)>,
    last_progress: Instant,
}

impl TraversalContext {
    fn new(config: TraversalConfig, base: String) -> Self {
        Self {
            range_start: config.start_index,
            range_stop: config.stop_index,
            step: config.batch_size,
            config,
            base,
            radix: Radix::Decimal,
            last_range: None,
            last_progress: Instant::now(),
        }
    }

    fn progress_level(&self) -> Level {
        if self.config.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }
}

/// # Traversal Engine
pub struct TraversalEngine {
    records: ChainRecordStore,
    statuses: NodeStatusTable,
    context: TraversalContext,
    phase: TraversalPhase,
    next_stream_id: i64,
}

impl Default for TraversalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TraversalEngine {
    pub fn new() -> Self {
        Self {
            records: ChainRecordStore::new(),
            statuses: NodeStatusTable::new(),
            context: TraversalContext::new(TraversalConfig::default(), String::new()),
            phase: TraversalPhase::Idle,
            next_stream_id: FIRST_ITEM_STREAM_ID,
        }
    }

    pub fn phase(&self) -> &TraversalPhase {
        &self.phase
    }

    /// A traversal has started and not reached a terminal state.
    pub fn is_active(&self) -> bool {
        matches!(self.phase, TraversalPhase::Probing | TraversalPhase::Expanding)
    }

    pub fn strategy(&self) -> Strategy {
        self.context.config.strategy
    }

    pub fn radix(&self) -> Radix {
        self.context.radix
    }

    /// Detected or configured batch width, `0` before the probe round settled.
    pub fn step(&self) -> u32 {
        self.context.step
    }

    pub fn start_name(&self) -> &str {
        self.records.start_name()
    }

    pub fn records(&self) -> &ChainRecordStore {
        &self.records
    }

    pub fn statuses(&self) -> &NodeStatusTable {
        &self.statuses
    }

    fn take_stream_id(&mut self) -> i64 {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        id
    }

    /// Resets all traversal state and issues the first request(s) for `start_name`.
    pub fn start(
        &mut self,
        start_name: &str,
        config: TraversalConfig,
        sink: &mut dyn RequestSink,
    ) -> Result<(), ChainError> {
        if start_name.is_empty() || start_name.contains(',') || start_name.chars().any(char::is_whitespace) {
            return Err(ChainError::InvalidStartName(start_name.to_string()));
        }

        let base = split_node_name(start_name).1.to_string();
        self.records.reset(start_name);
        self.statuses.clear();
        self.context = TraversalContext::new(config, base);
        self.statuses.declare(start_name);

        let strategy = self.context.config.strategy;
        let names = match strategy {
            Strategy::Sequential => {
                log::info!("Start retrieving {} sequentially", start_name);
                self.phase = TraversalPhase::Expanding;
                vec![start_name.to_string()]
            }
            Strategy::Heuristic => {
                log::info!("Start retrieving {} with probe batch on {}", start_name, self.context.base);
                let base = self.context.base.clone();
                for i in 0..=10u32 {
                    self.statuses.declare(&Radix::Decimal.node_name(i, &base));
                }
                for probe in HEX_PROBES {
                    self.statuses.declare(&format!("{}#{}", probe, base));
                }
                self.phase = TraversalPhase::Probing;
                self.statuses.names_with_status(NodeStatus::Waiting)
            }
        };

        let id = self.take_stream_id();
        if let Err(e) = sink.send_request(OutboundRequest::snapshot(id, names)) {
            self.phase = TraversalPhase::Failed(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Handles a refresh for `name`.
    ///
    /// `fields` is the refresh field map; `stream_id` its request identifier.
    pub fn on_refresh(
        &mut self,
        name: &str,
        stream_id: i64,
        fields: Option<&Map<String, Value>>,
        sink: &mut dyn RequestSink,
        events: &mut dyn EventSink,
    ) {
        if !self.is_active() {
            log::debug!("Ignoring refresh for {} outside an active traversal", name);
            return;
        }
        if !self.statuses.contains(name) {
            log::debug!("Refresh for unrequested name {} ignored", name);
            return;
        }
        if !self.statuses.resolve(name, NodeStatus::Received) {
            log::debug!("Duplicate refresh for {} ignored", name);
            return;
        }
        self.context.last_progress = Instant::now();

        if let Some(fields) = fields {
            let record = ChainRecord::decode(fields, stream_id);
            if !record.is_valid() {
                if self.context.config.verbose {
                    log::info!("{} is not a valid chain. Fields: {}", name, Value::Object(fields.clone()));
                }
                self.statuses.clear();
                self.fail(
                    format!("Extraction failed because {} is not a valid chain.", name),
                    true,
                    events,
                );
                return;
            }

            let level = self.context.progress_level();
            let next = record.next().to_string();
            let prev = record.prev().to_string();
            log::log!(
                level,
                "Process refresh for {} [{}] previous is {}{}",
                name,
                record.display_name(),
                if prev.is_empty() { "empty" } else { prev.as_str() },
                if next.is_empty() {
                    " <= final node".to_string()
                } else {
                    format!(", next is {}", next)
                }
            );

            let is_first = record.is_first();
            let is_last = record.is_last();
            self.records.put(name, record);

            if self.strategy() == Strategy::Sequential {
                if !is_last {
                    self.follow(&next, sink, events);
                }
                if !is_first {
                    self.follow(&prev, sink, events);
                }
                if !self.is_active() {
                    return;
                }
            }
        }

        self.check_completion(sink, events);
    }

    /// Requests a neighbour discovered through a pointer, once.
    fn follow(&mut self, name: &str, sink: &mut dyn RequestSink, events: &mut dyn EventSink) {
        if name.is_empty() || !self.is_active() || !self.statuses.declare(name) {
            return;
        }
        let id = self.take_stream_id();
        if let Err(e) = sink.send_request(OutboundRequest::snapshot(id, vec![name.to_string()])) {
            self.fail(format!("Chain extraction stopped, unable to request {}: {}", name, e), false, events);
        }
    }

    /// Handles a status message for `name`.
    pub fn on_status(
        &mut self,
        name: &str,
        state: &State,
        sink: &mut dyn RequestSink,
        events: &mut dyn EventSink,
    ) {
        if name.is_empty() || !self.is_active() {
            return;
        }
        if !state.stream.is_closed() {
            log::debug!("Status for {}: {:?}/{:?}", name, state.stream, state.data);
            return;
        }
        if !self.statuses.contains(name) {
            log::debug!("Closed status for undeclared name {} ignored", name);
            return;
        }
        if !self.statuses.resolve(name, NodeStatus::NotFound) {
            log::debug!("Duplicate status for {} ignored", name);
            return;
        }
        self.context.last_progress = Instant::now();

        let text = state.text.clone().unwrap_or_default();
        if name == self.records.start_name() {
            self.fail(format!("Chain extraction failed {}", text), true, events);
            return;
        }
        if self.strategy() == Strategy::Sequential {
            self.fail(
                format!(
                    "Chain extraction stopped because it can't retrieve next node {}. Code:{}",
                    name,
                    state.code.as_deref().unwrap_or_default()
                ),
                true,
                events,
            );
            return;
        }

        self.check_completion(sink, events);
    }

    /// Completion check, run after every response. Idempotent.
    fn check_completion(&mut self, sink: &mut dyn RequestSink, events: &mut dyn EventSink) {
        if !self.is_active() || self.records.is_empty() || !self.statuses.all_resolved() {
            return;
        }

        if self.records.has_first() && self.records.has_last() {
            self.finish(true, "Extraction completed successfully.".to_string(), events);
            return;
        }

        match self.strategy() {
            Strategy::Sequential => self.fail(
                format!(
                    "Chain extraction incomplete: all {} requested nodes resolved without reaching both ends of {}",
                    self.statuses.len(),
                    self.records.start_name()
                ),
                false,
                events,
            ),
            Strategy::Heuristic => self.expand(sink, events),
        }
    }

    /// Settles the probe round or checks the chain can continue, then requests the next range.
    fn expand(&mut self, sink: &mut dyn RequestSink, events: &mut dyn EventSink) {
        if self.phase == TraversalPhase::Probing {
            self.settle_probes();
            self.phase = TraversalPhase::Expanding;
        } else if let Some(reason) = self.blocked_reason().or_else(|| self.stalled_reason()) {
            self.fail(reason, false, events);
            return;
        }

        for _ in 0..MAX_EMPTY_RANGES {
            let (first, last) = (self.context.range_start, self.context.range_stop);
            let names: Vec<String> = (first..=last)
                .map(|i| self.context.radix.node_name(i, &self.context.base))
                .filter(|name| self.statuses.declare(name))
                .collect();
            self.context.range_start = last + 1;
            self.context.range_stop = last + self.context.step;

            if names.is_empty() {
                continue;
            }

            log::debug!(
                "Requesting {} nodes in range {}..={} on {}",
                names.len(),
                first,
                last,
                self.context.base
            );
            self.context.last_range = Some((first, last, self.statuses.count(NodeStatus::Received)));
            let id = self.take_stream_id();
            if let Err(e) = sink.send_request(OutboundRequest::snapshot(id, names)) {
                self.fail(format!("Chain extraction stopped, unable to request next batch: {}", e), false, events);
            }
            return;
        }

        self.fail(
            format!("Chain extraction stopped, no new node names to request on {}", self.context.base),
            false,
            events,
        );
    }

    /// Detects radix and step from the probe round.
    fn settle_probes(&mut self) {
        let base = self.context.base.clone();
        let status = |index: &str| self.statuses.status(&format!("{}#{}", index, base));

        if status("A") == Some(NodeStatus::Received) {
            self.context.radix = Radix::Hexadecimal;
        }

        if self.context.config.batch_size > 0 {
            self.context.step = self.context.config.batch_size;
        } else {
            let detected = PROBE_PAIRS.iter().find_map(|(a, b, step)| {
                (status(*a) == Some(NodeStatus::NotFound) && status(*b) == Some(NodeStatus::NotFound)).then_some(*step)
            });
            self.context.step = detected.unwrap_or_else(|| {
                log::warn!(
                    "No probe pair is absent on {}, the chain may be longer than the probes describe. Using step {}",
                    base,
                    FALLBACK_STEP
                );
                FALLBACK_STEP
            });
            self.context.range_stop = self.context.step;
        }

        log::info!(
            "Chain {} uses {:?} indices, batch step {}",
            base,
            self.context.radix,
            self.context.step
        );
    }

    /// Why the next range can not help, if it can't.
    fn blocked_reason(&self) -> Option<String> {
        let last = self.statuses.last_received()?;
        let next = self.records.get(last).map(ChainRecord::next).unwrap_or_default();

        if next.is_empty() {
            if self.records.get(last).is_some_and(ChainRecord::is_last) {
                return Some(format!(
                    "Chain extraction incomplete: reached final node {} without finding the first node",
                    last
                ));
            }
            return None;
        }
        if self.statuses.status(next) == Some(NodeStatus::NotFound) {
            return Some(format!(
                "Chain extraction stopped, cannot retrieve next node {} after {}: NotFound",
                next, last
            ));
        }
        None
    }

    /// Failure reason when the last requested range resolved without a single new `Received` name.
    ///
    /// The forward pointer of the chain then lies outside the synthesized ranges.
    fn stalled_reason(&self) -> Option<String> {
        let (first, last, received) = self.context.last_range?;
        if self.statuses.count(NodeStatus::Received) > received {
            return None;
        }
        let pointer = self
            .statuses
            .last_received()
            .and_then(|name| {
                let next = self.records.get(name).map(ChainRecord::next).unwrap_or_default();
                (!next.is_empty()).then(|| format!(", next node {} after {} is not an index of {}", next, name, self.context.base))
            })
            .unwrap_or_default();
        Some(format!(
            "Chain extraction stopped, no node found in range {}..={} on {}{}",
            first, last, self.context.base, pointer
        ))
    }

    /// Fails the traversal when names have been waiting longer than the configured timeout.
    ///
    /// Returns `true` when the traversal was failed by this call.
    pub fn expire_waiting(&mut self, now: Instant, events: &mut dyn EventSink) -> bool {
        let Some(timeout) = self.context.config.waiting_timeout else {
            return false;
        };
        if !self.is_active() || now.saturating_duration_since(self.context.last_progress) <= timeout {
            return false;
        }
        let waiting = self.statuses.names_with_status(NodeStatus::Waiting);
        if waiting.is_empty() {
            return false;
        }

        let shown: Vec<&str> = waiting.iter().take(10).map(String::as_str).collect();
        let more = waiting.len().saturating_sub(shown.len());
        self.fail(
            format!(
                "Chain extraction timed out after {}s waiting for {}{}",
                timeout.as_secs(),
                shown.join(","),
                if more > 0 { format!(" and {} more", more) } else { String::new() }
            ),
            false,
            events,
        );
        true
    }

    /// Aborts the traversal. `discard` drops partially collected records.
    fn fail(&mut self, reason: String, discard: bool, events: &mut dyn EventSink) {
        if discard {
            let start = self.records.start_name().to_string();
            self.records.reset(&start);
        }
        self.finish(false, reason, events);
    }

    /// Terminal transition. Emits the outcome exactly once.
    fn finish(&mut self, success: bool, message: String, events: &mut dyn EventSink) {
        if self.phase.is_terminal() {
            return;
        }
        let outcome = aggregate(&self.records, &self.statuses, success, message.clone());
        if success {
            log::info!(
                "{}: {} constituents in {} nodes of {}",
                message,
                outcome.constituents.len(),
                outcome.subscribed.len(),
                outcome.start_name
            );
            self.phase = TraversalPhase::Completed;
        } else {
            log::warn!("{}", message);
            self.phase = TraversalPhase::Failed(message);
        }
        events.emit(ChainEvent::ExtractionComplete(outcome));
    }
}
