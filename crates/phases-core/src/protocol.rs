use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::Value;
use thiserror::Error;

use crate::StatusData;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const HANDSHAKE_GREETING: &str = "Hello from Phases client.";
pub const RECONNECT_GREETING: &str = "Attempting to reconnect.";

/// Messages the client sends to the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Handshake { data: String },
    Reconnect { data: String },
    FetchStatus,
    Set { targets: Vec<Target> },
    StartAll,
    StopAll,
}

impl Outbound {
    pub fn handshake() -> Self {
        Self::Handshake {
            data: HANDSHAKE_GREETING.to_string(),
        }
    }

    pub fn reconnect() -> Self {
        Self::Reconnect {
            data: RECONNECT_GREETING.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::Reconnect { .. } => "reconnect",
            Self::FetchStatus => "fetch_status",
            Self::Set { .. } => "set",
            Self::StartAll => "start_all",
            Self::StopAll => "stop_all",
        }
    }

    pub fn targets(&self) -> &[Target] {
        match self {
            Self::Set { targets } => targets,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Sequencer,
    Master,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequencer => "sequencer",
            Self::Master => "master",
        }
    }
}

/// One addressed entity inside a `set` batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// A single attribute change. `step` is the only positional one: it flips one
/// entry of `state` instead of replacing the whole vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Attribute {
    Multiplier {
        value: f64,
    },
    Index {
        value: usize,
    },
    Step {
        index: usize,
        value: bool,
    },
    LoopPoint {
        value: usize,
    },
    Sync {
        value: bool,
    },
    Percentage {
        value: f64,
    },
    State {
        #[serde(serialize_with = "serialize_steps", deserialize_with = "deserialize_steps")]
        value: Vec<bool>,
    },
    Interval {
        value: f64,
    },
    StepSize {
        value: i64,
    },
    Start,
    Stop,
}

impl Attribute {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Multiplier { .. } => "multiplier",
            Self::Index { .. } => "index",
            Self::Step { .. } => "step",
            Self::LoopPoint { .. } => "loop_point",
            Self::Sync { .. } => "sync",
            Self::Percentage { .. } => "percentage",
            Self::State { .. } => "state",
            Self::Interval { .. } => "interval",
            Self::StepSize { .. } => "step_size",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

// Steps go out as 0/1 so the controller can shift them straight into its mask.
fn serialize_steps<S>(steps: &[bool], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(steps.iter().map(|armed| u8::from(*armed)))
}

fn deserialize_steps<'de, D>(deserializer: D) -> Result<Vec<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<Value> = Vec::deserialize(deserializer)?;
    values
        .into_iter()
        .map(|value| match value {
            Value::Bool(armed) => Ok(armed),
            Value::Number(n) => Ok(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
            other => Err(serde::de::Error::custom(format!(
                "expected bool or number step, got {other}"
            ))),
        })
        .collect()
}

/// Messages the controller sends back.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Status(StatusData),
    Handshake(StatusData),
    Reconnect(StatusData),
    Result(Value),
    Message(Value),
    Error(Value),
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Handshake(_) => "handshake",
            Self::Reconnect(_) => "reconnect",
            Self::Result(_) => "result",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: String,
    /// Kept as text until the type is known; step masks may not fit a u64.
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("malformed {kind} frame: {reason}")]
    Malformed { kind: String, reason: String },
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

pub fn encode(message: &Outbound) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|err| ProtocolError::Encode(err.to_string()))
}

pub fn decode_outbound(text: &str) -> Result<Outbound, ProtocolError> {
    serde_json::from_str(text).map_err(|err| ProtocolError::Malformed {
        kind: "outbound".to_string(),
        reason: err.to_string(),
    })
}

pub fn decode_inbound(text: &str) -> Result<Inbound, ProtocolError> {
    decode_inbound_with_limit(text, DEFAULT_MAX_FRAME_BYTES)
}

/// Two-stage decode: the envelope first, so an unknown `type` can be told
/// apart from a known one carrying bad `data`.
pub fn decode_inbound_with_limit(
    text: &str,
    max_frame_bytes: usize,
) -> Result<Inbound, ProtocolError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(ProtocolError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let envelope: RawInbound =
        serde_json::from_str(raw).map_err(|err| ProtocolError::Malformed {
            kind: "envelope".to_string(),
            reason: err.to_string(),
        })?;

    let kind = envelope.kind.as_str();
    let data = envelope.data.as_deref();
    match kind {
        "status" => payload(kind, data).map(Inbound::Status),
        "handshake" => payload(kind, data).map(Inbound::Handshake),
        "reconnect" => payload(kind, data).map(Inbound::Reconnect),
        "result" => log_payload(kind, data).map(Inbound::Result),
        "message" => log_payload(kind, data).map(Inbound::Message),
        "error" => log_payload(kind, data).map(Inbound::Error),
        _ => Err(ProtocolError::UnknownType(kind.to_string())),
    }
}

fn payload<T>(kind: &str, data: Option<&RawValue>) -> Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    let raw = data.map(RawValue::get).unwrap_or("null");
    serde_json::from_str(raw).map_err(|err| ProtocolError::Malformed {
        kind: kind.to_string(),
        reason: err.to_string(),
    })
}

fn log_payload(kind: &str, data: Option<&RawValue>) -> Result<Value, ProtocolError> {
    payload(kind, data)
}
