use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type Amplitude reserves for user property updates.
pub const IDENTIFY_EVENT_TYPE: &str = "$identify";

/// Every attribute an event accepts besides `event_type`, as documented for the
/// HTTP V2 and Batch APIs. Anything outside this set is not part of the event.
pub const ATTRIBUTES: &[&str] = &[
    "user_id",
    "device_id",
    "time",
    "event_properties",
    "user_properties",
    "groups",
    "group_properties",
    "app_version",
    "version_name",
    "library",
    "platform",
    "os_name",
    "os_version",
    "device_brand",
    "device_manufacturer",
    "device_model",
    "carrier",
    "country",
    "region",
    "city",
    "dma",
    "language",
    "location_lat",
    "location_lng",
    "ip",
    "idfa",
    "idfv",
    "adid",
    "android_id",
    "price",
    "quantity",
    "revenue",
    "product_id",
    "revenue_type",
    "event_id",
    "session_id",
    "insert_id",
    "plan",
    "partner_id",
    "ingestion_metadata",
];

/// A behavioral event as accepted by the ingestion APIs.
///
/// The identity and time fields are typed; every other attribute lives in
/// `attributes` and is serialized inline next to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Whether `key` names an attribute of the event model, `event_type` included.
    pub fn is_attribute(key: &str) -> bool {
        key == "event_type" || ATTRIBUTES.contains(&key)
    }

    /// Sets one of the untyped attributes. Returns the value back if `key` is
    /// not an attribute or is one of the typed fields.
    pub fn set_attribute(&mut self, key: &str, value: Value) -> Result<(), Value> {
        match key {
            "event_type" | "user_id" | "device_id" | "time" => Err(value),
            _ if ATTRIBUTES.contains(&key) => {
                self.attributes.insert(key.to_owned(), value);
                Ok(())
            }
            _ => Err(value),
        }
    }
}

/// The user the event or identify update belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOptions {
    pub user_id: Option<String>,
    pub device_id: Option<String>,
}

impl EventOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            device_id: None,
        }
    }
}

/// A set of user property operations. Only `$set` is supported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identify {
    set: Map<String, Value>,
}

impl Identify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.set.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.set
    }

    /// The `user_properties` payload of the resulting `$identify` event.
    pub fn user_properties(&self) -> Value {
        let mut operations = Map::new();
        operations.insert("$set".to_owned(), Value::Object(self.set.clone()));
        Value::Object(operations)
    }

    pub fn into_event(self, options: EventOptions) -> Event {
        let mut event = Event::new(IDENTIFY_EVENT_TYPE);
        event.user_id = options.user_id;
        event.device_id = options.device_id;
        event
            .attributes
            .insert("user_properties".to_owned(), self.user_properties());
        event
    }
}
