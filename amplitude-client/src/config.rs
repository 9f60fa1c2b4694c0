use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::BackoffPolicy;
use crate::event::Event;

const US_SERVER_URL: &str = "https://api2.amplitude.com";
const EU_SERVER_URL: &str = "https://api.eu.amplitude.com";

const HTTP_API_PATH: &str = "2/httpapi";
const BATCH_API_PATH: &str = "batch";

/// Called once per event with the final status code of its delivery and an
/// optional detail message. The status code is zero when no response was received.
pub type Callback = Arc<dyn Fn(&Event, u16, Option<&str>) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ServerZone {
    #[default]
    #[serde(rename = "US", alias = "us")]
    Us,
    #[serde(rename = "EU", alias = "eu")]
    Eu,
}

impl ServerZone {
    pub fn server_url(&self) -> &'static str {
        match self {
            ServerZone::Us => US_SERVER_URL,
            ServerZone::Eu => EU_SERVER_URL,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    /// Number of queued events that triggers a send. Also the largest batch sent at once.
    pub flush_queue_size: usize,
    /// Longest time an event waits in the queue before being sent.
    pub flush_interval: Duration,
    /// How many times a failed request is retried before its events are given up on.
    pub flush_max_retries: u32,
    /// Send to the Batch API instead of the HTTP V2 API.
    pub use_batch: bool,
    pub server_zone: ServerZone,
    /// Base URL overriding `server_zone`.
    pub server_url: Option<String>,
    pub request_timeout: Duration,
    pub retry_policy: BackoffPolicy,
    pub callback: Option<Callback>,
}

impl Config {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            flush_queue_size: 200,
            flush_interval: Duration::from_millis(10_000),
            flush_max_retries: 12,
            use_batch: false,
            server_zone: ServerZone::default(),
            server_url: None,
            request_timeout: Duration::from_secs(10),
            retry_policy: BackoffPolicy::default(),
            callback: None,
        }
    }

    /// The full URL events are posted to.
    pub fn endpoint(&self) -> String {
        let base = self
            .server_url
            .as_deref()
            .unwrap_or_else(|| self.server_zone.server_url())
            .trim_end_matches('/');
        let path = if self.use_batch {
            BATCH_API_PATH
        } else {
            HTTP_API_PATH
        };

        format!("{base}/{path}")
    }
}
