//! # Streaming JSON WebSocket Transport
//!
//! Connects to the market-data server with the `tr_json2` sub-protocol and moves
//! frames between the socket and the dispatcher queues. The transport holds no
//! traversal state: text frames go to the inbound queue untouched, and outbound
//! requests are serialized with [`OutboundRequest::to_json`].

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::core::error::ChainError;
use crate::core::sink::{ChainEvent, EventSink};
use crate::markets::trep::message::OutboundRequest;

/// WebSocket sub-protocol of the JSON feed.
pub const TR_JSON2: &str = "tr_json2";

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A connected client socket.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TrepConfig {
    /// Server address, `ws://host:port/WebSocket` or `wss://...`.
    pub url: String,
    /// Sub-protocol requested during the handshake.
    pub protocol: String,
    /// Connection attempts before giving up.
    pub connect_retries: u32,
    /// Log raw inbound frames and outbound requests.
    pub print_json: bool,
}

impl Default for TrepConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:15000/WebSocket".to_string(),
            protocol: TR_JSON2.to_string(),
            connect_retries: 3,
            print_json: false,
        }
    }
}

impl TrepConfig {
    /// Checks that the address is a WebSocket URL.
    pub fn validate_url(&self) -> Result<url::Url, ChainError> {
        let parsed = url::Url::parse(&self.url).map_err(|e| ChainError::Url(format!("{}: {}", self.url, e)))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(parsed),
            other => Err(ChainError::Url(format!("{}: unsupported scheme {}", self.url, other))),
        }
    }
}

/// Connects once per attempt, doubling the delay between attempts (1 s up to 60 s).
pub async fn connect_with_retry(config: &TrepConfig) -> Result<WsStream, ChainError> {
    config.validate_url()?;
    let attempts = config.connect_retries.max(1);
    let mut backoff = Duration::from_secs(1);

    for attempt in 1..=attempts {
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChainError::Url(e.to_string()))?;
        let protocol = HeaderValue::from_str(&config.protocol).map_err(|e| ChainError::Transport(e.to_string()))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", protocol);

        log::info!("Connecting to {} (attempt {}/{})", config.url, attempt, attempts);
        match connect_async(request).await {
            Ok((stream, _)) => {
                log::info!("WebSocket connection established with {}", config.url);
                return Ok(stream);
            }
            Err(e) if attempt < attempts => {
                log::error!("Failed to connect to {}: {}. Retrying in {}s...", config.url, e, backoff.as_secs());
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
            Err(e) => {
                return Err(ChainError::Transport(format!(
                    "Unable to connect to {} after {} attempts: {}",
                    config.url, attempts, e
                )))
            }
        }
    }
    Err(ChainError::Transport(format!("Unable to connect to {}", config.url)))
}

/// # Streaming JSON Transport
pub struct TrepWssTransport {
    config: TrepConfig,
}

impl TrepWssTransport {
    /// Creates a transport for `config`. Nothing connects until [`run`](Self::run).
    pub fn new(config: TrepConfig) -> Self {
        Self { config }
    }

    /// # Run
    ///
    /// Connects, then pumps frames in both directions until the server closes the
    /// socket, the socket fails, or the outbound queue closes. Socket failures are
    /// also reported on `events`. Dropping `inbound` on return tells the
    /// dispatcher the connection is gone.
    pub async fn run(
        &self,
        mut outbound: mpsc::UnboundedReceiver<OutboundRequest>,
        inbound: mpsc::UnboundedSender<String>,
        mut events: mpsc::UnboundedSender<ChainEvent>,
    ) -> Result<(), ChainError> {
        let stream = match connect_with_retry(&self.config).await {
            Ok(stream) => stream,
            Err(e) => {
                events.emit(ChainEvent::error(e.to_string()));
                return Err(e);
            }
        };
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if self.config.print_json {
                            log_pretty("RECEIVED", text.as_str());
                        }
                        if inbound.send(text.as_str().to_string()).is_err() {
                            log::info!("Dispatcher gone, closing WebSocket.");
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::warn!("WebSocket closed by server: {:?}", frame);
                        events.emit(ChainEvent::error("WebSocket closed by server"));
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = ChainError::Transport(e.to_string());
                        log::error!("{}", err);
                        events.emit(ChainEvent::error(err.to_string()));
                        return Err(err);
                    }
                    None => {
                        log::warn!("WebSocket stream ended.");
                        events.emit(ChainEvent::error("WebSocket stream ended"));
                        return Ok(());
                    }
                },
                request = outbound.recv() => match request {
                    Some(request) => {
                        let body = request.to_json();
                        if self.config.print_json {
                            log_pretty("SENT", &body.to_string());
                        }
                        if let Err(e) = write.send(Message::Text(body.to_string().into())).await {
                            let err = ChainError::Transport(e.to_string());
                            log::error!("{}", err);
                            events.emit(ChainEvent::error(err.to_string()));
                            return Err(err);
                        }
                    }
                    None => {
                        log::info!("Outbound queue closed, closing WebSocket.");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                },
            }
        }
    }
}

fn log_pretty(direction: &str, text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => log::info!(
            "{}:\n{}",
            direction,
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string())
        ),
        Err(_) => log::info!("{}: {}", direction, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[test]
    fn test_validate_url() {
        let config = TrepConfig::default();
        assert!(config.validate_url().is_ok());

        let http = TrepConfig {
            url: "http://127.0.0.1:15000".into(),
            ..TrepConfig::default()
        };
        assert!(matches!(http.validate_url(), Err(ChainError::Url(_))));

        let garbage = TrepConfig {
            url: "not a url".into(),
            ..TrepConfig::default()
        };
        assert!(matches!(garbage.validate_url(), Err(ChainError::Url(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = TrepWssTransport::new(TrepConfig {
            url: format!("ws://{}/WebSocket", addr),
            connect_retries: 1,
            ..TrepConfig::default()
        });
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, _in_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();

        let result = transport.run(out_rx, in_tx, ev_tx).await;
        assert!(matches!(result, Err(ChainError::Transport(_))));
        assert!(matches!(ev_rx.recv().await, Some(ChainEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                let protocol = request.headers().get("Sec-WebSocket-Protocol").unwrap();
                assert_eq!(protocol.to_str().unwrap(), TR_JSON2);
                response
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(TR_JSON2));
                Ok(response)
            };
            let mut ws = accept_hdr_async(stream, callback).await.unwrap();
            ws.send(Message::Text(r#"[{"Type":"Ping"}]"#.to_string().into()))
                .await
                .unwrap();
            let reply = ws.next().await.unwrap().unwrap();
            let _ = ws.close(None).await;
            reply.into_text().unwrap().as_str().to_string()
        });

        let transport = TrepWssTransport::new(TrepConfig {
            url: format!("ws://{}/WebSocket", addr),
            connect_retries: 1,
            ..TrepConfig::default()
        });
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        let (ev_tx, _ev_rx) = mpsc::unbounded_channel();
        let client = tokio::spawn(async move { transport.run(out_rx, in_tx, ev_tx).await });

        let frame = in_rx.recv().await.unwrap();
        assert_eq!(frame, r#"[{"Type":"Ping"}]"#);
        out_tx.send(OutboundRequest::Pong).unwrap();

        let reply = server.await.unwrap();
        assert_eq!(serde_json::from_str::<Value>(&reply).unwrap(), json!({"Type": "Pong"}));
        assert!(client.await.unwrap().is_ok());
    }
}
