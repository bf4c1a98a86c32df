use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};
use crate::position::PositionFix;

/// A decoded JSON object received from the station.
///
/// The link enforces no schema beyond "one JSON object per line";
/// interpretation of the keys is left to the application.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationMessage(Map<String, Value>);

impl StationMessage {
    /// Decode one received line. Trailing `\r`/`\n` are ignored.
    pub fn decode_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        match serde_json::from_str::<Value>(line)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProtocolError::NotAnObject(json_kind(&other))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for StationMessage {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A message sent from the client to the station.
#[derive(Clone, Debug, PartialEq)]
pub enum OutgoingMessage {
    /// Position update for the station's map and distance display.
    Position(PositionFix),
    /// Heartbeat telling the station the client is still there.
    Alive,
    /// Any other JSON object, sent as-is.
    Raw(Map<String, Value>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Tagged<'a> {
    Gps(&'a PositionFix),
    Alive,
}

impl OutgoingMessage {
    /// Serialize to a single JSON line, including the trailing `\n`.
    pub fn to_line(&self) -> Result<String> {
        let mut line = match self {
            Self::Position(fix) => serde_json::to_string(&Tagged::Gps(fix))?,
            Self::Alive => serde_json::to_string(&Tagged::Alive)?,
            Self::Raw(map) => serde_json::to_string(map)?,
        };
        line.push('\n');
        Ok(line)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Position(_) => "gps",
            Self::Alive => "alive",
            Self::Raw(_) => "raw",
        }
    }
}
