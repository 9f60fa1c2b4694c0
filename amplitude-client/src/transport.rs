use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::backoff::BackoffPolicy;
use crate::config::{Callback, Config};
use crate::error::DeliveryError;
use crate::event::Event;

const SUCCESS_MESSAGE: &str = "Event sent successfully.";

#[derive(Serialize)]
struct Payload<'a> {
    api_key: &'a str,
    events: &'a [Event],
}

/// Posts batches of events, retrying transient failures, and reports the
/// final outcome of every event to the callback.
pub(crate) struct Transport {
    client: Client,
    url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    retry_policy: BackoffPolicy,
    callback: Option<Callback>,
}

impl Transport {
    pub fn new(config: &Config) -> Result<Self, DeliveryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("target-amplitude/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(DeliveryError::Client)?;

        Ok(Self {
            client,
            url: config.endpoint(),
            api_key: config.api_key.clone(),
            batch_size: config.flush_queue_size.max(1),
            max_retries: config.flush_max_retries,
            retry_policy: config.retry_policy,
            callback: config.callback.clone(),
        })
    }

    pub fn deliver(&self, events: &[Event]) {
        for batch in events.chunks(self.batch_size) {
            self.send_with_retries(batch);
        }
    }

    fn send_with_retries(&self, events: &[Event]) {
        let mut attempt = 0;
        loop {
            match self.post(events) {
                Ok(status) => {
                    debug!(count = events.len(), %status, "delivered events");
                    self.report(events, status.as_u16(), Some(SUCCESS_MESSAGE));
                    return;
                }
                Err(DeliveryError::PayloadTooLarge) if events.len() > 1 => {
                    let (head, tail) = events.split_at(events.len() / 2);
                    warn!(
                        count = events.len(),
                        "payload too large, splitting batch in two"
                    );
                    self.send_with_retries(head);
                    self.send_with_retries(tail);
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_policy.delay_for(attempt, e.retry_after());
                    warn!(
                        "transient delivery error, retrying (attempt {}/{}, delay {:?}): {}",
                        attempt + 1,
                        self.max_retries,
                        delay,
                        e
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        count = events.len(),
                        "failed to deliver events after {} attempts: {}",
                        attempt + 1,
                        e
                    );
                    self.report(events, e.status_code(), Some(&e.to_string()));
                    return;
                }
            }
        }
    }

    fn post(&self, events: &[Event]) -> Result<StatusCode, DeliveryError> {
        let payload = Payload {
            api_key: &self.api_key,
            events,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .map_err(DeliveryError::Connection)?;

        let status = response.status();
        if status.is_success() {
            return Ok(status);
        }

        let retry_after = parse_retry_after_header(response.headers());
        let body = response.text().unwrap_or_default();

        Err(classify_failure(status, retry_after, body))
    }

    fn report(&self, events: &[Event], status: u16, message: Option<&str>) {
        if let Some(callback) = &self.callback {
            for event in events {
                callback(event, status, message);
            }
        }
    }
}

fn classify_failure(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> DeliveryError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        DeliveryError::PayloadTooLarge
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        DeliveryError::RateLimited { retry_after, body }
    } else if status.is_server_error() {
        DeliveryError::Server {
            status: status.as_u16(),
            retry_after,
            body,
        }
    } else {
        DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

/// Attempt to parse a Duration from a Retry-After header, returning None if not possible.
/// Retry-After header can specify a date in RFC2822 or a number of seconds; we try to parse both.
fn parse_retry_after_header(header_map: &HeaderMap) -> Option<Duration> {
    let retry_after = header_map.get(header::RETRY_AFTER)?.to_str().ok()?;

    if let Ok(u) = retry_after.parse::<u64>() {
        return Some(Duration::from_secs(u));
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let duration =
            chrono::DateTime::<chrono::offset::Utc>::from(dt) - chrono::offset::Utc::now();

        // This can only fail when negative, in which case we return None.
        return duration.to_std().ok();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(StatusCode::PAYLOAD_TOO_LARGE, None, String::new()),
            DeliveryError::PayloadTooLarge
        ));
        assert!(matches!(
            classify_failure(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(2)),
                String::new()
            ),
            DeliveryError::RateLimited {
                retry_after: Some(_),
                ..
            }
        ));
        assert!(classify_failure(StatusCode::BAD_GATEWAY, None, String::new()).is_retryable());
        assert!(!classify_failure(StatusCode::BAD_REQUEST, None, String::new()).is_retryable());
        assert!(!classify_failure(StatusCode::FORBIDDEN, None, String::new()).is_retryable());
    }

    #[test]
    fn test_parse_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::RETRY_AFTER, "120".parse().unwrap());

        let duration = parse_retry_after_header(&headers).unwrap();
        assert_eq!(duration, Duration::from_secs(120));

        headers.remove(header::RETRY_AFTER);

        let duration = parse_retry_after_header(&headers);
        assert_eq!(duration, None);

        // Dates in the past cannot be waited for.
        headers.insert(
            header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );

        let duration = parse_retry_after_header(&headers);
        assert_eq!(duration, None);
    }
}
