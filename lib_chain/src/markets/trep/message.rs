//! # Wire Messages
//!
//! Typed projections of the JSON messages exchanged with the streaming server
//! (`tr_json2` sub-protocol). Inbound frames are JSON arrays of message objects;
//! outbound requests are single objects built by [`OutboundRequest::to_json`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::core::error::ChainError;

/// Message kinds. `Request`, `Close` and `Pong` are only ever sent by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageType {
    /// Item or login request (no `Type` attribute on the wire).
    Request,
    /// Full image of an item.
    Refresh,
    /// Incremental change of an item.
    Update,
    /// Stream or data state change.
    Status,
    /// Server keep-alive.
    Ping,
    /// Keep-alive answer.
    Pong,
    /// Server-side protocol error.
    Error,
    /// Closes a stream.
    Close,
}

impl FromStr for MessageType {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "request" => Ok(MessageType::Request),
            "refresh" => Ok(MessageType::Refresh),
            "update" => Ok(MessageType::Update),
            "status" => Ok(MessageType::Status),
            "ping" => Ok(MessageType::Ping),
            "pong" => Ok(MessageType::Pong),
            "error" => Ok(MessageType::Error),
            "close" => Ok(MessageType::Close),
            _ => Err(ChainError::UnknownMessageType(s.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Domain models handled by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Domain {
    /// Session login stream.
    Login,
    /// Market data items, chain records included.
    MarketPrice,
}

impl Domain {
    /// Parses the `Domain` attribute. A missing attribute means `MarketPrice`.
    pub fn parse(value: Option<&str>) -> Result<Self, ChainError> {
        match value.map(|v| v.to_ascii_lowercase()) {
            None => Ok(Domain::MarketPrice),
            Some(v) if v == "marketprice" => Ok(Domain::MarketPrice),
            Some(v) if v == "login" => Ok(Domain::Login),
            Some(_) => Err(ChainError::UnsupportedDomain(value.unwrap_or_default().to_string())),
        }
    }

    fn as_wire(self) -> &'static str {
        match self {
            Domain::Login => "Login",
            Domain::MarketPrice => "MarketPrice",
        }
    }
}

/// Stream state of a `State` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamState {
    /// Stream is open and will receive updates.
    Open,
    /// Snapshot delivered, no updates will follow.
    NonStreaming,
    /// Stream closed, the item can not be recovered.
    Closed,
    /// Stream closed, the item may be requested again later.
    ClosedRecover,
    /// Item moved to another name or service.
    Redirected,
    /// Any value this client does not model.
    #[default]
    #[serde(other)]
    Unspecified,
}

impl StreamState {
    /// `Closed` or `ClosedRecover`.
    pub fn is_closed(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::ClosedRecover)
    }
}

/// Data state of a `State` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataState {
    /// Data is unchanged since the last message.
    NoChange,
    /// Data is good.
    Ok,
    /// Data may be stale.
    Suspect,
    /// Any value this client does not model.
    #[default]
    #[serde(other)]
    Unknown,
}

/// State block carried by refresh and status messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct State {
    pub stream: StreamState,
    pub data: DataState,
    pub code: Option<String>,
    pub text: Option<String>,
}

/// Message key. `Name` may arrive as a string or a list of strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Key {
    #[serde(deserialize_with = "name_list")]
    pub name: Vec<String>,
    pub service: Option<Value>,
    pub name_type: Option<String>,
    pub elements: Option<Map<String, Value>>,
}

impl Key {
    /// The key names joined with `,`, the way items are correlated to requests.
    pub fn joined_name(&self) -> String {
        self.name.join(",")
    }
}

fn name_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NameField {
        One(String),
        Many(Vec<String>),
        Missing(()),
    }

    Ok(match NameField::deserialize(deserializer)? {
        NameField::One(name) => vec![name],
        NameField::Many(names) => names,
        NameField::Missing(_) => Vec::new(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEnvelope {
    r#type: Option<String>,
    domain: Option<String>,
    #[serde(rename = "ID")]
    id: Option<i64>,
    key: Option<Key>,
    state: Option<State>,
    fields: Option<Map<String, Value>>,
    text: Option<String>,
    debug: Option<Value>,
}

/// # Envelope
///
/// One decoded inbound message plus the raw JSON it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub kind: MessageType,
    pub domain: Domain,
    pub id: Option<i64>,
    pub key: Option<Key>,
    pub state: Option<State>,
    pub fields: Option<Map<String, Value>>,
    pub text: Option<String>,
    pub debug: Option<Value>,
    pub raw: Value,
}

impl Envelope {
    /// Decodes one message object.
    ///
    /// Returns `Ok(None)` for objects without a `Type` attribute, which carry
    /// nothing this client acts on.
    pub fn from_value(value: Value) -> Result<Option<Self>, ChainError> {
        let raw: RawEnvelope = serde_json::from_value(value.clone())?;
        let Some(kind) = raw.r#type.as_deref() else {
            return Ok(None);
        };
        let kind = kind.parse::<MessageType>()?;
        let domain = Domain::parse(raw.domain.as_deref())?;

        Ok(Some(Envelope {
            kind,
            domain,
            id: raw.id,
            key: raw.key,
            state: raw.state,
            fields: raw.fields,
            text: raw.text,
            debug: raw.debug,
            raw: value,
        }))
    }

    /// Item name(s) of the key, empty when the message has no key.
    pub fn item_name(&self) -> String {
        self.key.as_ref().map(Key::joined_name).unwrap_or_default()
    }
}

/// Splits an inbound text frame into its message objects.
///
/// Frames are normally arrays; a single object is accepted as a one-element frame.
pub fn parse_frame(text: &str) -> Result<Vec<Value>, ChainError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => Ok(items),
        other => Ok(vec![other]),
    }
}

/// Requests this client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundRequest {
    /// Opens the login stream.
    Login {
        id: i64,
        user: String,
        app_id: String,
        position: String,
    },
    /// Snapshot (or streaming) request for one or more items.
    Item {
        id: i64,
        names: Vec<String>,
        streaming: bool,
        view: Option<Vec<String>>,
    },
    /// Closes a stream.
    Close { id: i64, domain: Domain },
    /// Keep-alive answer to a server ping.
    Pong,
}

impl OutboundRequest {
    /// Snapshot request for `names` without a field view.
    pub fn snapshot(id: i64, names: Vec<String>) -> Self {
        OutboundRequest::Item {
            id,
            names,
            streaming: false,
            view: None,
        }
    }

    /// Wire representation.
    pub fn to_json(&self) -> Value {
        match self {
            OutboundRequest::Login {
                id,
                user,
                app_id,
                position,
            } => json!({
                "ID": id,
                "Domain": Domain::Login.as_wire(),
                "Key": {
                    "Name": user,
                    "Elements": {
                        "ApplicationId": app_id,
                        "Position": position,
                    }
                }
            }),
            OutboundRequest::Item {
                id,
                names,
                streaming,
                view,
            } => {
                let mut request = json!({
                    "ID": id,
                    "Domain": Domain::MarketPrice.as_wire(),
                    "Key": {
                        "Name": names,
                        "NameType": "Ric",
                    },
                    "Streaming": streaming,
                });
                if let Some(view) = view {
                    request["View"] = json!(view);
                }
                request
            }
            OutboundRequest::Close { id, domain } => json!({
                "ID": id,
                "Type": "Close",
                "Domain": domain.as_wire(),
            }),
            OutboundRequest::Pong => json!({ "Type": "Pong" }),
        }
    }
}
