//! # Chain Dispatcher
//!
//! The single task that owns all traversal state. Three sources feed it through
//! one `tokio::select!` loop:
//!
//! 1.  **Inbound frames** from the transport, handed to the [`MessageRouter`].
//! 2.  **Host commands** ([`DispatcherCommand`]) to log in, start an extraction,
//!     close the login or stop.
//! 3.  **A periodic tick** that runs the waiting-node timeout.
//!
//! Outbound requests and host events leave through unbounded channels, so no
//! handler ever awaits while holding state.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::core::engine::TraversalConfig;
use crate::core::router::MessageRouter;
use crate::core::sink::{ChainEvent, EventSink};
use crate::markets::trep::message::OutboundRequest;

/// Default interval of the timeout check.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Commands a host sends to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatcherCommand {
    /// Open the login stream.
    Login {
        user: String,
        app_id: String,
        position: String,
    },
    /// Start a traversal from `name`. A running traversal is abandoned.
    Extract { name: String, config: TraversalConfig },
    /// Close the login stream.
    CloseLogin,
    /// Leave the dispatch loop.
    Shutdown,
}

type ChannelRouter = MessageRouter<mpsc::UnboundedSender<OutboundRequest>, mpsc::UnboundedSender<ChainEvent>>;

/// # Chain Dispatcher
pub struct ChainDispatcher {
    router: ChannelRouter,
    events: mpsc::UnboundedSender<ChainEvent>,
    tick: Duration,
}

impl ChainDispatcher {
    /// Creates a dispatcher writing requests to `outbound` and notifications to `events`.
    pub fn new(outbound: mpsc::UnboundedSender<OutboundRequest>, events: mpsc::UnboundedSender<ChainEvent>) -> Self {
        Self {
            router: MessageRouter::new(outbound, events.clone()),
            events,
            tick: DEFAULT_TICK,
        }
    }

    /// Overrides the timeout check interval.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// # Run
    ///
    /// Processes frames and commands until `Shutdown`, until the command channel
    /// closes or until the inbound stream ends. The end of the inbound stream is
    /// reported as an error event.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<String>,
        mut commands: mpsc::UnboundedReceiver<DispatcherCommand>,
    ) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(text) => self.router.dispatch_frame(&text),
                    None => {
                        log::warn!("Inbound stream ended, stopping dispatcher.");
                        self.events.emit(ChainEvent::error("Connection closed"));
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(DispatcherCommand::Shutdown) | None => {
                        log::info!("Dispatcher shutting down.");
                        break;
                    }
                    Some(command) => self.handle(command),
                },
                _ = ticker.tick() => {
                    self.router.tick(Instant::now());
                }
            }
        }
    }

    fn handle(&mut self, command: DispatcherCommand) {
        let result = match command {
            DispatcherCommand::Login { user, app_id, position } => self.router.send_login(&user, &app_id, &position),
            DispatcherCommand::Extract { name, config } => {
                // start_extraction already reports the error as an event
                let _ = self.router.start_extraction(&name, config);
                Ok(())
            }
            DispatcherCommand::CloseLogin => self.router.close_login(),
            DispatcherCommand::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            log::error!("{}", e);
            self.events.emit(ChainEvent::error(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::Strategy;
    use serde_json::json;

    struct Wiring {
        frames: mpsc::UnboundedSender<String>,
        commands: mpsc::UnboundedSender<DispatcherCommand>,
        outbound: mpsc::UnboundedReceiver<OutboundRequest>,
        events: mpsc::UnboundedReceiver<ChainEvent>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_dispatcher(tick: Duration) -> Wiring {
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let dispatcher = ChainDispatcher::new(outbound_tx, events_tx).with_tick(tick);
        let handle = tokio::spawn(dispatcher.run(frames_rx, commands_rx));
        Wiring {
            frames,
            commands,
            outbound,
            events,
            handle,
        }
    }

    #[tokio::test]
    async fn test_login_and_sequential_extraction() {
        let mut w = spawn_dispatcher(DEFAULT_TICK);
        w.commands
            .send(DispatcherCommand::Login {
                user: "user".into(),
                app_id: "256".into(),
                position: "127.0.0.1/net".into(),
            })
            .unwrap();
        assert!(matches!(w.outbound.recv().await, Some(OutboundRequest::Login { id: 1, .. })));

        w.commands
            .send(DispatcherCommand::Extract {
                name: "0#.X".into(),
                config: TraversalConfig::default().with_strategy(Strategy::Sequential),
            })
            .unwrap();
        assert!(matches!(w.outbound.recv().await, Some(OutboundRequest::Item { .. })));

        let frame = json!([
            {"ID": 5, "Type": "Refresh", "Key": {"Name": "0#.X"},
             "Fields": {"LINK_1": "A.N", "NEXT_LR": "", "PREV_LR": ""}}
        ]);
        w.frames.send(frame.to_string()).unwrap();

        match w.events.recv().await {
            Some(ChainEvent::ExtractionComplete(outcome)) => {
                assert!(outcome.success);
                assert_eq!(outcome.constituents, vec!["A.N"]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        w.commands.send(DispatcherCommand::Shutdown).unwrap();
        w.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_inbound_end_reports_error() {
        let mut w = spawn_dispatcher(DEFAULT_TICK);
        drop(w.frames);
        match w.events.recv().await {
            Some(ChainEvent::Error { message, .. }) => assert_eq!(message, "Connection closed"),
            other => panic!("unexpected event {:?}", other),
        }
        w.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_expires_waiting_nodes() {
        let mut w = spawn_dispatcher(Duration::from_millis(20));
        let config = TraversalConfig {
            waiting_timeout: Some(Duration::from_millis(50)),
            ..TraversalConfig::default().with_strategy(Strategy::Sequential)
        };
        w.commands
            .send(DispatcherCommand::Extract {
                name: "0#.X".into(),
                config,
            })
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), w.events.recv())
            .await
            .unwrap();
        match event {
            Some(ChainEvent::ExtractionComplete(outcome)) => {
                assert!(!outcome.success);
                assert!(outcome.message.contains("timed out"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        w.commands.send(DispatcherCommand::Shutdown).unwrap();
        w.handle.await.unwrap();
    }
}
