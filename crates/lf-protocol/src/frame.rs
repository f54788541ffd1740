//! graphql-ws wire frames.
//!
//! Outbound frames are serialized from borrowed structs so field order on
//! the wire is fixed. Inbound frames are decoded leniently: only `type` is
//! required, everything else is optional.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::descriptor::{AuthHeader, ConnectionDescriptor};
use crate::ProtocolError;

/// WebSocket subprotocol negotiated on connect.
pub const SUBPROTOCOL: &str = "graphql-ws";

/// Fixed user agent the upstream service requires in `start` extensions.
pub const AMPLIFY_USER_AGENT: &str = "aws-amplify/2.0.8";

/// Opaque GraphQL document plus its ordered variables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubscriptionRequest {
    pub query: String,
    pub variables: Map<String, Value>,
}

impl SubscriptionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Map::new(),
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    ConnectionInit {
        payload: InitPayload<'a>,
    },
    Start {
        id: &'a str,
        payload: StartPayload<'a>,
    },
    Stop {
        id: &'a str,
    },
}

#[derive(Serialize)]
struct InitPayload<'a> {
    authorization: AuthHeader<'a>,
}

#[derive(Serialize)]
struct StartPayload<'a> {
    data: String,
    extensions: StartExtensions<'a>,
}

#[derive(Serialize)]
struct StartExtensions<'a> {
    authorization: StartAuthorization<'a>,
}

#[derive(Serialize)]
struct StartAuthorization<'a> {
    #[serde(rename = "Authorization")]
    authorization: &'a str,
    host: &'a str,
    #[serde(rename = "x-amz-user-agent")]
    user_agent: &'a str,
}

#[derive(Serialize, Deserialize)]
struct StartData {
    query: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    variables: Map<String, Value>,
}

fn encode(frame: &Outbound<'_>) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// `{"type":"connection_init","payload":{"authorization":{..}}}`
pub fn encode_connection_init(descriptor: &ConnectionDescriptor) -> Result<String, ProtocolError> {
    encode(&Outbound::ConnectionInit {
        payload: InitPayload {
            authorization: descriptor.auth(),
        },
    })
}

/// `{"type":"start","id":..,"payload":{"data":"<json>","extensions":{..}}}`
///
/// `data` is the JSON text of `{query, variables}`; `variables` is omitted
/// when empty.
pub fn encode_start(
    descriptor: &ConnectionDescriptor,
    id: &str,
    request: &SubscriptionRequest,
) -> Result<String, ProtocolError> {
    let data = serde_json::to_string(&StartData {
        query: request.query.clone(),
        variables: request.variables.clone(),
    })
    .map_err(|e| ProtocolError::Encode(e.to_string()))?;

    encode(&Outbound::Start {
        id,
        payload: StartPayload {
            data,
            extensions: StartExtensions {
                authorization: StartAuthorization {
                    authorization: descriptor.token(),
                    host: descriptor.host(),
                    user_agent: AMPLIFY_USER_AGENT,
                },
            },
        },
    })
}

/// `{"type":"stop","id":..}`
pub fn encode_stop(id: &str) -> Result<String, ProtocolError> {
    encode(&Outbound::Stop { id })
}

/// Decode a `start` frame back into its id and request.
pub fn decode_start(text: &str) -> Result<(String, SubscriptionRequest), ProtocolError> {
    let v: Value = serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    match v.get("type").and_then(Value::as_str) {
        Some("start") => {}
        Some(other) => return Err(ProtocolError::UnexpectedType(other.to_string())),
        None => return Err(ProtocolError::MissingType),
    }
    let id = v
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("start frame without id".to_string()))?;
    let data = v
        .pointer("/payload/data")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("start frame without payload.data".to_string()))?;
    let parsed: StartData =
        serde_json::from_str(data).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    Ok((
        id.to_string(),
        SubscriptionRequest {
            query: parsed.query,
            variables: parsed.variables,
        },
    ))
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Server frame types the client acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    ConnectionAck,
    StartAck,
    KeepAlive,
    Data,
    Error,
    Complete,
    ConnectionError,
}

impl FrameKind {
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "connection_ack" => Self::ConnectionAck,
            "start_ack" => Self::StartAck,
            "ka" => Self::KeepAlive,
            "data" => Self::Data,
            "error" => Self::Error,
            "complete" => Self::Complete,
            "connection_error" => Self::ConnectionError,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionAck => "connection_ack",
            Self::StartAck => "start_ack",
            Self::KeepAlive => "ka",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::ConnectionError => "connection_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub kind: FrameKind,
    pub id: Option<String>,
    pub payload: Option<Value>,
}

impl InboundFrame {
    /// Classify one text frame.
    ///
    /// # Errors
    /// `Malformed` for non-JSON or non-object bodies, `MissingType` when
    /// `type` is absent, `UnexpectedType` for tags this client does not know.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let v: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Value::Object(mut obj) = v else {
            return Err(ProtocolError::Malformed("frame is not a JSON object".to_string()));
        };
        let tag = match obj.get("type") {
            Some(Value::String(s)) => s.clone(),
            Some(_) | None => return Err(ProtocolError::MissingType),
        };
        let kind = FrameKind::parse(&tag).ok_or(ProtocolError::UnexpectedType(tag))?;
        let id = match obj.remove("id") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        let payload = obj.remove("payload").filter(|p| !p.is_null());
        Ok(Self { kind, id, payload })
    }
}
