use amplitude_client::Event;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::TargetError;

/// Keys loaders add to every row, never meant to reach the destination.
pub const PIPELINE_METADATA_KEYS: &[&str] =
    &["_sdc_extracted_at", "_sdc_batched_at", "_etl_tstamp"];

pub const MIN_USER_ID_LENGTH: usize = 5;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

/// What to do with record keys that are not attributes of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributePolicy {
    Reject,
    #[default]
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Records are behavioral events.
    Track,
    /// Records carry user properties to set.
    Identify,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldTransformer {
    pub policy: AttributePolicy,
    pub strip_pipeline_metadata: bool,
}

impl Default for FieldTransformer {
    fn default() -> Self {
        Self {
            policy: AttributePolicy::default(),
            strip_pipeline_metadata: true,
        }
    }
}

impl FieldTransformer {
    pub fn new(policy: AttributePolicy, strip_pipeline_metadata: bool) -> Self {
        Self {
            policy,
            strip_pipeline_metadata,
        }
    }

    /// Normalizes a validated record into the shape of an event.
    ///
    /// Null identity and time fields count as absent and are dropped.
    pub fn transform(
        &self,
        mut fields: Map<String, Value>,
        mode: Mode,
    ) -> Result<Map<String, Value>, TargetError> {
        for key in ["user_id", "device_id", "time", "revenue"] {
            if fields.get(key).is_some_and(Value::is_null) {
                fields.remove(key);
            }
        }

        if !fields.contains_key("user_id") && !fields.contains_key("device_id") {
            return Err(TargetError::MissingIdentity);
        }

        if let Some(user_id) = fields.get("user_id") {
            check_user_id(user_id)?;
        }
        if let Some(device_id) = fields.get("device_id") {
            if !device_id.is_string() {
                return Err(TargetError::InvalidIdentity(format!(
                    "device_id must be a string, got {device_id}"
                )));
            }
        }

        if let Some(time) = fields.get_mut("time") {
            let millis = match &*time {
                Value::String(s) => convert_to_timestamp_millis(s)?,
                other => return Err(TargetError::TimestampFormat(other.to_string())),
            };
            *time = Value::from(millis);
        }

        if let Some(revenue) = fields.get_mut("revenue") {
            *revenue = Value::Number(coerce_revenue(revenue)?);
        }

        if mode == Mode::Identify {
            return Ok(fields);
        }

        if self.strip_pipeline_metadata {
            for key in PIPELINE_METADATA_KEYS {
                fields.remove(*key);
            }
        }

        let mut event = Map::with_capacity(fields.len());
        for (key, value) in fields {
            if Event::is_attribute(&key) {
                event.insert(key, value);
                continue;
            }
            match self.policy {
                AttributePolicy::Reject => return Err(TargetError::UnexpectedAttribute(key)),
                AttributePolicy::Skip => debug!(key = %key, "skipping unexpected event property"),
            }
        }

        Ok(event)
    }
}

fn check_user_id(user_id: &Value) -> Result<(), TargetError> {
    let Value::String(user_id) = user_id else {
        return Err(TargetError::InvalidIdentity(format!(
            "user_id must be a string, got {user_id}"
        )));
    };

    if user_id.chars().count() < MIN_USER_ID_LENGTH {
        return Err(TargetError::InvalidIdentity(format!(
            "a user_id must have a minimum length of {MIN_USER_ID_LENGTH} characters, got {user_id:?}"
        )));
    }

    Ok(())
}

fn coerce_revenue(revenue: &Value) -> Result<Number, TargetError> {
    let parsed = match revenue {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .and_then(Number::from_f64)
        .ok_or_else(|| TargetError::NumericCoercion(revenue.clone()))
}

/// Converts `YYYY-MM-DDTHH:MM:SS+00:00` to milliseconds since the Unix epoch.
pub fn convert_to_timestamp_millis(time: &str) -> Result<i64, TargetError> {
    let parsed = NaiveDateTime::parse_from_str(time, TIMESTAMP_FORMAT)
        .map_err(|_| TargetError::TimestampFormat(time.to_owned()))?;

    Ok(parsed.and_utc().timestamp() * 1000)
}
