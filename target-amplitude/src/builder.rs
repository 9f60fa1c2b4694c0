use amplitude_client::{Event, EventOptions, Identify};
use serde_json::{Map, Value};

use crate::dispatch::Dispatch;
use crate::error::TargetError;
use crate::transform::Mode;

/// Tracked right after an identify so the new user properties show up without
/// waiting for the user's next real event.
pub const REFRESH_EVENT_TYPE: &str = "Empty event to refresh user properties";

#[derive(Debug, Clone, Copy)]
pub struct EventBuilder {
    pub mode: Mode,
    pub refresh_after_identify: bool,
}

impl EventBuilder {
    pub fn new(mode: Mode, refresh_after_identify: bool) -> Self {
        Self {
            mode,
            refresh_after_identify,
        }
    }

    /// Builds what a transformed record is dispatched as.
    pub fn build(&self, fields: Map<String, Value>) -> Result<Vec<Dispatch>, TargetError> {
        match self.mode {
            Mode::Track => Ok(vec![Dispatch::Track(build_event(fields)?)]),
            Mode::Identify => self.build_identify(fields),
        }
    }

    fn build_identify(&self, mut fields: Map<String, Value>) -> Result<Vec<Dispatch>, TargetError> {
        let user_id = match fields.remove("user_id") {
            Some(Value::String(user_id)) => user_id,
            _ => return Err(TargetError::MissingIdentity),
        };

        let Some(Value::Object(properties)) = fields.remove("user_property") else {
            return Err(TargetError::MissingUserProperties);
        };

        let mut identify = Identify::new();
        for (key, value) in properties {
            identify.set(key, value);
        }
        if identify.is_empty() {
            return Err(TargetError::MissingUserProperties);
        }

        let mut dispatches = vec![Dispatch::Identify(
            identify,
            EventOptions::for_user(user_id.clone()),
        )];
        if self.refresh_after_identify {
            dispatches.push(Dispatch::Track(
                Event::new(REFRESH_EVENT_TYPE).with_user_id(user_id),
            ));
        }

        Ok(dispatches)
    }
}

fn build_event(mut fields: Map<String, Value>) -> Result<Event, TargetError> {
    let mut event = match fields.remove("event_type") {
        Some(Value::String(event_type)) if !event_type.is_empty() => Event::new(event_type),
        _ => return Err(TargetError::MissingEventType),
    };

    for (key, value) in fields {
        match (key.as_str(), value) {
            ("user_id", Value::String(user_id)) => event.user_id = Some(user_id),
            ("device_id", Value::String(device_id)) => event.device_id = Some(device_id),
            ("time", Value::Number(time)) if time.is_i64() => event.time = time.as_i64(),
            ("time", other) => return Err(TargetError::TimestampFormat(other.to_string())),
            (_, value) => event
                .set_attribute(&key, value)
                .map_err(|_| TargetError::UnexpectedAttribute(key.clone()))?,
        }
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_build_track_event() {
        let builder = EventBuilder::new(Mode::Track, true);
        let dispatches = builder
            .build(fields(json!({
                "event_type": "login",
                "user_id": "abcde",
                "time": 1609459200000i64,
                "event_properties": {"source": "web"},
            })))
            .unwrap();

        let [Dispatch::Track(event)] = dispatches.as_slice() else {
            panic!("expected one tracked event, got {dispatches:?}");
        };
        assert_json_eq!(
            serde_json::to_value(event).unwrap(),
            json!({
                "event_type": "login",
                "user_id": "abcde",
                "time": 1609459200000i64,
                "event_properties": {"source": "web"},
            })
        );
    }

    #[test]
    fn test_missing_event_type() {
        let builder = EventBuilder::new(Mode::Track, true);
        for record in [
            json!({"user_id": "abcde"}),
            json!({"user_id": "abcde", "event_type": ""}),
            json!({"user_id": "abcde", "event_type": 7}),
        ] {
            let err = builder.build(fields(record)).unwrap_err();
            assert!(matches!(err, TargetError::MissingEventType));
        }
    }

    #[test]
    fn test_build_identify_with_refresh() {
        let builder = EventBuilder::new(Mode::Identify, true);
        let dispatches = builder
            .build(fields(json!({"user_id": "abcde", "user_property": {"plan": "pro"}})))
            .unwrap();

        assert_eq!(dispatches.len(), 2);
        let Dispatch::Identify(identify, options) = &dispatches[0] else {
            panic!("expected an identify first, got {dispatches:?}");
        };
        assert_eq!(identify.properties().get("plan"), Some(&json!("pro")));
        assert_eq!(options, &EventOptions::for_user("abcde"));

        let Dispatch::Track(refresh) = &dispatches[1] else {
            panic!("expected a refresh event second, got {dispatches:?}");
        };
        assert_eq!(refresh.event_type, REFRESH_EVENT_TYPE);
        assert_eq!(refresh.user_id.as_deref(), Some("abcde"));
        assert!(refresh.attributes.is_empty());
    }

    #[test]
    fn test_build_identify_without_refresh() {
        let builder = EventBuilder::new(Mode::Identify, false);
        let dispatches = builder
            .build(fields(json!({"user_id": "abcde", "user_property": {"plan": "pro"}})))
            .unwrap();
        assert_eq!(dispatches.len(), 1);
    }

    #[test]
    fn test_identify_requires_user_id() {
        let builder = EventBuilder::new(Mode::Identify, true);
        let err = builder
            .build(fields(json!({"device_id": "d1", "user_property": {"plan": "pro"}})))
            .unwrap_err();
        assert!(matches!(err, TargetError::MissingIdentity));
    }

    #[test]
    fn test_identify_requires_user_properties() {
        let builder = EventBuilder::new(Mode::Identify, true);
        for record in [
            json!({"user_id": "abcde"}),
            json!({"user_id": "abcde", "user_property": {}}),
            json!({"user_id": "abcde", "user_property": "pro"}),
        ] {
            let err = builder.build(fields(record)).unwrap_err();
            assert!(matches!(err, TargetError::MissingUserProperties));
        }
    }
}
