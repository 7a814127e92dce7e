pub mod cache;
pub mod command;
pub mod division;
pub mod fanout;
pub mod pattern;
pub mod protocol;
pub mod surface;
pub mod view;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::fmt;

use crate::division::Division;

/// Id the controller reports for its master sequencer.
pub const MASTER_ID: &str = "master";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityId {
    Master,
    Sequencer(String),
}

impl EntityId {
    pub fn sequencer(id: impl Into<String>) -> Self {
        Self::Sequencer(id.into())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Master => f.write_str(MASTER_ID),
            EntityId::Sequencer(id) => f.write_str(id),
        }
    }
}

/// Last reported attributes of one sequencer track.
///
/// `index` and `loop_point` are kept signed and unchecked: the controller is
/// trusted to report them, and the display helpers below turn values outside
/// the track into "nothing highlighted" instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "WireSequencerStatus")]
pub struct SequencerStatus {
    pub id: String,
    pub length: usize,
    pub index: i64,
    pub loop_point: i64,
    pub state: Vec<bool>,
    pub multiplier: f64,
    pub sync: bool,
    pub percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
}

impl SequencerStatus {
    pub fn display_index(&self) -> Option<usize> {
        usize::try_from(self.index)
            .ok()
            .filter(|index| *index < self.length)
    }

    /// 1-based loop point, when it names a step of this track.
    pub fn selected_loop_point(&self) -> Option<usize> {
        usize::try_from(self.loop_point)
            .ok()
            .filter(|point| (1..=self.length).contains(point))
    }

    pub fn division(&self) -> Option<&'static Division> {
        division::for_multiplier(self.multiplier)
    }
}

#[derive(Deserialize)]
struct WireSequencerStatus {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    length: usize,
    #[serde(default)]
    index: i64,
    #[serde(default = "default_loop_point")]
    loop_point: i64,
    #[serde(default)]
    state: Option<Box<RawValue>>,
    #[serde(default = "default_multiplier")]
    multiplier: f64,
    #[serde(default, alias = "sync_flag")]
    sync: bool,
    #[serde(default = "default_percentage")]
    percentage: f64,
    #[serde(default)]
    step_size: Option<i64>,
    #[serde(default)]
    interval: Option<f64>,
    #[serde(default)]
    is_running: Option<bool>,
}

/// Longest decimal step mask accepted, enough for 4096 steps.
pub const MAX_MASK_DIGITS: usize = 1234;

/// The controller keeps steps as an integer bitmask of arbitrary width and
/// reports either the mask itself or its expansion into a list. The mask is
/// read from its decimal text so steps past bit 63 survive.
fn decode_steps(raw: &RawValue, length: usize) -> Result<Vec<bool>, String> {
    let text = raw.get().trim();
    if text.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(text).map_err(|err| err.to_string())?;
        let mut steps: Vec<bool> = values.iter().map(step_value).collect();
        steps.resize(length, false);
        return Ok(steps);
    }
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("state is neither a step list nor a step mask: {text}"));
    }
    if text.len() > MAX_MASK_DIGITS {
        return Err(format!("step mask has {} digits, max {MAX_MASK_DIGITS}", text.len()));
    }
    Ok(mask_steps(text, length))
}

/// Expands a decimal mask into `length` steps, bit `i` being step `i`.
fn mask_steps(digits: &str, length: usize) -> Vec<bool> {
    // little-endian base 2^32
    let mut limbs: Vec<u32> = Vec::new();
    for digit in digits.bytes().map(|b| u64::from(b - b'0')) {
        let mut carry = digit;
        for limb in limbs.iter_mut() {
            let acc = u64::from(*limb) * 10 + carry;
            *limb = acc as u32;
            carry = acc >> 32;
        }
        if carry > 0 {
            limbs.push(carry as u32);
        }
    }
    (0..length)
        .map(|bit| {
            limbs
                .get(bit / 32)
                .is_some_and(|limb| (limb >> (bit % 32)) & 1 == 1)
        })
        .collect()
}

impl TryFrom<WireSequencerStatus> for SequencerStatus {
    type Error = String;

    fn try_from(wire: WireSequencerStatus) -> Result<Self, Self::Error> {
        let state = match wire.state {
            Some(raw) => decode_steps(&raw, wire.length)?,
            None => vec![false; wire.length],
        };
        Ok(Self {
            id: wire.id,
            length: wire.length,
            index: wire.index,
            loop_point: wire.loop_point,
            state,
            multiplier: wire.multiplier,
            sync: wire.sync,
            percentage: wire.percentage,
            step_size: wire.step_size,
            interval: wire.interval,
            is_running: wire.is_running,
        })
    }
}

fn default_loop_point() -> i64 {
    1
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_percentage() -> f64 {
    1.0
}

fn step_value(value: &Value) -> bool {
    match value {
        Value::Bool(armed) => *armed,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Payload of `status`, `handshake` and `reconnect` messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusData {
    pub master_sequencer_status: SequencerStatus,
    #[serde(default)]
    pub sequencer_statuses: Vec<SequencerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
}

impl StatusData {
    pub fn sequencer_ids(&self) -> Vec<String> {
        self.sequencer_statuses
            .iter()
            .map(|status| status.id.clone())
            .collect()
    }
}

/// Deserialize an ID that can be either a string or a number into a String
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}
