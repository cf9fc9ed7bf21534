use anyhow::{Context, Result};
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

use lib_chain::core::dispatcher::{ChainDispatcher, DispatcherCommand};
use lib_chain::ingestors::TrepWssTransport;

mod expander_logic;
use expander_logic::session::{ExtractionSession, SessionAction};
use expander_logic::{config, logger, output};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = config::load_config()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let transport = TrepWssTransport::new(settings.transport_config());
    let transport_events = events_tx.clone();
    let transport_handle =
        tokio::spawn(async move { transport.run(outbound_rx, inbound_tx, transport_events).await });
    let dispatcher_handle = tokio::spawn(ChainDispatcher::new(outbound_tx, events_tx).run(inbound_rx, commands_rx));

    commands_tx
        .send(DispatcherCommand::Login {
            user: settings.username.clone(),
            app_id: settings.app_id.clone(),
            position: settings.position.clone(),
        })
        .context("Dispatcher stopped before login")?;

    let mut session = ExtractionSession::new(&settings);
    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else {
                    log::warn!("Connection lost before the extraction finished.");
                    break;
                };
                match session.on_event(&event) {
                    SessionAction::Continue => {}
                    SessionAction::Extract { name, nested } => {
                        commands_tx
                            .send(DispatcherCommand::Extract {
                                name,
                                config: settings.traversal_config(nested),
                            })
                            .context("Dispatcher stopped")?;
                    }
                    SessionAction::Finish(report) => {
                        println!("{}", report.render());
                        if let Some(path) = &settings.output_file {
                            match output::write_constituents(path, &report.constituents) {
                                Ok(()) => println!("Write constituent list to {} completed.", path.display()),
                                Err(e) => log::error!("{:#}", e),
                            }
                        }
                        let _ = commands_tx.send(DispatcherCommand::CloseLogin);
                        break;
                    }
                    SessionAction::Stop(reason) => {
                        log::warn!("{}", reason);
                        break;
                    }
                }
            }
            _ = signal::ctrl_c() => {
                log::info!("Ctrl-C received, closing login.");
                let _ = commands_tx.send(DispatcherCommand::CloseLogin);
                break;
            }
        }
    }

    // The dispatcher drops the outbound queue on shutdown, which lets the
    // transport flush the close request and leave.
    let _ = commands_tx.send(DispatcherCommand::Shutdown);
    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = dispatcher_handle.await;
        let _ = transport_handle.await;
    })
    .await
    .is_err()
    {
        log::warn!("Shutdown did not complete within {}s.", SHUTDOWN_GRACE.as_secs());
    }

    log::info!("Shutdown complete.");
    Ok(())
}
