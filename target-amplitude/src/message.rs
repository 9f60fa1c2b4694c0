use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::TargetError;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Record(RecordMessage),
    Schema(SchemaMessage),
    State(StateMessage),
    /// A well-formed message with a type this target does not handle.
    Unknown { tag: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    pub record: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchemaMessage {
    pub stream: String,
    pub schema: Value,
    #[serde(deserialize_with = "nullable_list")]
    pub key_properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateMessage {
    pub value: Value,
}

impl Message {
    pub fn tag(&self) -> &str {
        match self {
            Message::Record(_) => "RECORD",
            Message::Schema(_) => "SCHEMA",
            Message::State(_) => "STATE",
            Message::Unknown { tag } => tag.as_str(),
        }
    }
}

/// Decodes one line of the input stream.
///
/// Fields other than the ones a message type needs (`version`,
/// `time_extracted`, `bookmark_properties`, ...) are ignored.
pub fn decode(line: &str) -> Result<Message, TargetError> {
    let mut fields: Map<String, Value> = serde_json::from_str(line)?;

    let tag = match fields.remove("type") {
        Some(Value::String(tag)) => tag,
        Some(other) => {
            return Err(serde_json::Error::custom(format!(
                "message type must be a string, got {other}"
            ))
            .into())
        }
        None => return Err(serde_json::Error::missing_field("type").into()),
    };

    let fields = Value::Object(fields);
    let message = match tag.as_str() {
        "RECORD" => Message::Record(serde_json::from_value(fields)?),
        "SCHEMA" => Message::Schema(serde_json::from_value(fields)?),
        "STATE" => Message::State(serde_json::from_value(fields)?),
        _ => Message::Unknown { tag },
    };

    Ok(message)
}

// `key_properties` is required, but taps commonly send null for streams without keys.
fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
