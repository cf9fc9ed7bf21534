//! # Message Router
//!
//! Decodes inbound frames and routes each envelope by type and domain:
//!
//! - `Ping` is answered with a `Pong` through the request sink.
//! - `Error` becomes a [`ChainEvent::Error`].
//! - Login domain messages track whether the session is open and are forwarded
//!   to the host as [`ChainEvent::LoginMessage`].
//! - Market-data refreshes and statuses drive the [`TraversalEngine`].
//! - A market-data status is also forwarded as [`ChainEvent::ExtractionStatus`],
//!   only while a sequential traversal is active. Statuses arriving after the
//!   traversal ended, or during a heuristic one, are not forwarded.
//!
//! A malformed envelope, an unknown type or an unhandled domain produces an error
//! event; the remaining envelopes of the frame are still processed.

use std::time::Instant;

use chrono::Local;
use serde_json::Value;

use crate::core::engine::{Strategy, TraversalConfig, TraversalEngine};
use crate::core::error::ChainError;
use crate::core::sink::{ChainEvent, EventSink, RequestSink};
use crate::markets::trep::message::{
    parse_frame, DataState, Domain, Envelope, MessageType, OutboundRequest, State, StreamState,
};

/// Request identifier of the login stream.
pub const LOGIN_STREAM_ID: i64 = 1;

/// # Message Router
///
/// Owns the traversal engine and both sinks. Only one task may drive it.
pub struct MessageRouter<R: RequestSink, E: EventSink> {
    engine: TraversalEngine,
    requests: R,
    events: E,
    login_open: bool,
}

impl<R: RequestSink, E: EventSink> MessageRouter<R, E> {
    pub fn new(requests: R, events: E) -> Self {
        Self {
            engine: TraversalEngine::new(),
            requests,
            events,
            login_open: false,
        }
    }

    pub fn engine(&self) -> &TraversalEngine {
        &self.engine
    }

    pub fn requests(&self) -> &R {
        &self.requests
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    /// Whether the last login refresh opened the session and no close followed.
    pub fn login_open(&self) -> bool {
        self.login_open
    }

    /// Sends the login request on [`LOGIN_STREAM_ID`].
    pub fn send_login(&mut self, user: &str, app_id: &str, position: &str) -> Result<(), ChainError> {
        log::info!("Sending login request for {}", user);
        self.requests.send_request(OutboundRequest::Login {
            id: LOGIN_STREAM_ID,
            user: user.to_string(),
            app_id: app_id.to_string(),
            position: position.to_string(),
        })
    }

    /// Closes the login stream.
    pub fn close_login(&mut self) -> Result<(), ChainError> {
        self.login_open = false;
        self.requests.send_request(OutboundRequest::Close {
            id: LOGIN_STREAM_ID,
            domain: Domain::Login,
        })
    }

    /// Starts a traversal. An invalid name is reported as an error event as well.
    pub fn start_extraction(&mut self, start_name: &str, config: TraversalConfig) -> Result<(), ChainError> {
        let result = self.engine.start(start_name, config, &mut self.requests);
        if let Err(e) = &result {
            self.events.emit(ChainEvent::error(e.to_string()));
        }
        result
    }

    /// Runs the waiting-node timeout check.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.engine.expire_waiting(now, &mut self.events)
    }

    /// Processes one inbound text frame.
    pub fn dispatch_frame(&mut self, text: &str) {
        match parse_frame(text) {
            Ok(values) => values.into_iter().for_each(|value| self.dispatch_value(value)),
            Err(e) => {
                log::error!("Unable to parse frame: {}", e);
                self.events.emit(ChainEvent::error(e.to_string()));
            }
        }
    }

    /// Processes one message object of a frame.
    pub fn dispatch_value(&mut self, value: Value) {
        match Envelope::from_value(value) {
            Ok(Some(envelope)) => self.route(envelope),
            Ok(None) => log::debug!("Skipping message without a type"),
            Err(e) => {
                log::error!("{}", e);
                self.events.emit(ChainEvent::error(e.to_string()));
            }
        }
    }

    fn route(&mut self, envelope: Envelope) {
        match envelope.kind {
            MessageType::Ping => {
                log::debug!("Ping received, sending pong");
                if let Err(e) = self.requests.send_request(OutboundRequest::Pong) {
                    self.events.emit(ChainEvent::error(e.to_string()));
                }
            }
            MessageType::Error => {
                let mut message = envelope.text.clone().unwrap_or_default();
                if let Some(debug) = &envelope.debug {
                    message = format!("{} {}", message, debug);
                }
                log::error!("Server error: {}", message);
                self.events.emit(ChainEvent::error(message));
            }
            _ => match envelope.domain {
                Domain::Login => self.route_login(envelope),
                Domain::MarketPrice => self.route_market_price(envelope),
            },
        }
    }

    fn route_login(&mut self, envelope: Envelope) {
        let state = envelope.state.clone().unwrap_or_default();
        match envelope.kind {
            MessageType::Refresh => {
                self.login_open = state.stream == StreamState::Open && state.data != DataState::Suspect;
                log::info!(
                    "Login refresh for {}: {:?}/{:?}",
                    envelope.item_name(),
                    state.stream,
                    state.data
                );
            }
            MessageType::Status => {
                if state.stream.is_closed() {
                    self.login_open = false;
                }
                log::info!("Login status: {:?} {}", state.stream, state.text.as_deref().unwrap_or_default());
            }
            MessageType::Update => log::debug!("Login update"),
            other => {
                log::debug!("Ignoring {} on the login stream", other);
                return;
            }
        }
        self.events.emit(ChainEvent::LoginMessage {
            timestamp: Local::now(),
            message: envelope,
        });
    }

    fn route_market_price(&mut self, envelope: Envelope) {
        let name = envelope.item_name();
        match envelope.kind {
            MessageType::Refresh => {
                self.engine.on_refresh(
                    &name,
                    envelope.id.unwrap_or_default(),
                    envelope.fields.as_ref(),
                    &mut self.requests,
                    &mut self.events,
                );
            }
            MessageType::Status => {
                let state: State = envelope.state.clone().unwrap_or_default();
                if self.engine.strategy() == Strategy::Sequential && self.engine.is_active() {
                    self.events.emit(ChainEvent::ExtractionStatus {
                        timestamp: Local::now(),
                        status: envelope,
                    });
                }
                self.engine.on_status(&name, &state, &mut self.requests, &mut self.events);
            }
            MessageType::Update => log::debug!("Update for {} ignored", name),
            other => log::debug!("Ignoring {} for {}", other, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::TraversalPhase;
    use serde_json::json;

    type TestRouter = MessageRouter<Vec<OutboundRequest>, Vec<ChainEvent>>;

    fn router() -> TestRouter {
        MessageRouter::new(Vec::new(), Vec::new())
    }

    fn sequential() -> TraversalConfig {
        TraversalConfig::default().with_strategy(Strategy::Sequential)
    }

    #[test]
    fn test_ping_is_answered() {
        let mut r = router();
        r.dispatch_frame(r#"[{"Type":"Ping"}]"#);
        assert_eq!(r.requests(), &vec![OutboundRequest::Pong]);
        assert!(r.events().is_empty());
    }

    #[test]
    fn test_login_refresh_opens_session() {
        let mut r = router();
        r.send_login("user", "256", "127.0.0.1/net").unwrap();
        r.dispatch_frame(
            &json!([{
                "ID": 1, "Type": "Refresh", "Domain": "Login",
                "Key": {"Name": "user"},
                "State": {"Stream": "Open", "Data": "Ok", "Text": "Login accepted"}
            }])
            .to_string(),
        );
        assert!(r.login_open());
        assert!(matches!(r.events()[0], ChainEvent::LoginMessage { .. }));

        r.dispatch_frame(
            &json!([{
                "ID": 1, "Type": "Status", "Domain": "Login",
                "State": {"Stream": "Closed", "Data": "Suspect", "Text": "Logged out"}
            }])
            .to_string(),
        );
        assert!(!r.login_open());
        assert_eq!(r.events().len(), 2);
    }

    #[test]
    fn test_suspect_login_refresh_keeps_session_closed() {
        let mut r = router();
        r.dispatch_frame(
            r#"[{"ID":1,"Type":"Refresh","Domain":"Login","State":{"Stream":"Open","Data":"Suspect"}}]"#,
        );
        assert!(!r.login_open());
    }

    #[test]
    fn test_malformed_and_unknown_envelopes_do_not_stop_the_frame() {
        let mut r = router();
        r.dispatch_frame(r#"[{"Type":"Bogus"},{"Type":"Refresh","Domain":"Dictionary"},{"Type":"Ping"}]"#);
        assert_eq!(r.requests(), &vec![OutboundRequest::Pong]);
        let errors = r
            .events()
            .iter()
            .filter(|e| matches!(e, ChainEvent::Error { .. }))
            .count();
        assert_eq!(errors, 2);

        r.dispatch_frame("not json");
        assert_eq!(r.events().len(), 3);
    }

    #[test]
    fn test_error_envelope_becomes_error_event() {
        let mut r = router();
        r.dispatch_frame(r#"[{"Type":"Error","Text":"JSON Unexpected Key","Debug":{"Offset":12}}]"#);
        match &r.events()[0] {
            ChainEvent::Error { message, .. } => {
                assert!(message.contains("JSON Unexpected Key"));
                assert!(message.contains("Offset"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_sequential_extraction_through_frames() {
        let mut r = router();
        r.start_extraction("0#.X", sequential()).unwrap();
        r.dispatch_frame(
            &json!([{
                "ID": 5, "Type": "Refresh", "Key": {"Name": "0#.X"},
                "Fields": {"LINK_1": "A.N", "LINK_2": "B.N", "NEXT_LR": "1#.X", "PREV_LR": ""}
            }])
            .to_string(),
        );
        assert_eq!(r.requests().len(), 2);
        r.dispatch_frame(
            &json!([{
                "ID": 6, "Type": "Refresh", "Domain": "MarketPrice", "Key": {"Name": "1#.X"},
                "Fields": {"LINK_1": "C.N", "NEXT_LR": "", "PREV_LR": "0#.X"}
            }])
            .to_string(),
        );
        assert_eq!(r.engine().phase(), &TraversalPhase::Completed);
        match r.events().last() {
            Some(ChainEvent::ExtractionComplete(outcome)) => {
                assert!(outcome.success);
                assert_eq!(outcome.constituents, vec!["A.N", "B.N", "C.N"]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_sequential_status_is_forwarded_before_failure() {
        let mut r = router();
        r.start_extraction("0#.X", sequential()).unwrap();
        r.dispatch_frame(
            r#"[{"ID":5,"Type":"Status","Key":{"Name":"0#.X"},"State":{"Stream":"Closed","Data":"Suspect","Code":"NotFound","Text":"**The record could not be found"}}]"#,
        );
        assert!(matches!(r.events()[0], ChainEvent::ExtractionStatus { .. }));
        match &r.events()[1] {
            ChainEvent::ExtractionComplete(outcome) => {
                assert!(!outcome.success);
                assert!(outcome.message.contains("could not be found"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_status_outside_active_sequential_traversal_is_not_forwarded() {
        let not_found = |name: &str| {
            json!([{
                "ID": 5, "Type": "Status", "Key": {"Name": name},
                "State": {"Stream": "Closed", "Data": "Suspect", "Code": "NotFound"}
            }])
            .to_string()
        };

        let mut r = router();
        r.start_extraction("0#.X", sequential()).unwrap();
        r.dispatch_frame(&not_found("0#.X"));
        assert_eq!(r.events().len(), 2);
        r.dispatch_frame(&not_found("0#.X"));
        assert_eq!(r.events().len(), 2);

        let mut r = router();
        r.start_extraction("0#.X", TraversalConfig::default()).unwrap();
        r.dispatch_frame(&not_found("1#.X"));
        assert!(!r.events().iter().any(|e| matches!(e, ChainEvent::ExtractionStatus { .. })));
    }

    #[test]
    fn test_invalid_start_name_emits_error() {
        let mut r = router();
        assert!(r.start_extraction("A, B", sequential()).is_err());
        assert!(r.requests().is_empty());
        assert!(matches!(r.events()[0], ChainEvent::Error { .. }));
    }

    #[test]
    fn test_close_login_request() {
        let mut r = router();
        r.close_login().unwrap();
        assert_eq!(
            r.requests()[0].to_json(),
            json!({"ID": 1, "Type": "Close", "Domain": "Login"})
        );
    }
}
