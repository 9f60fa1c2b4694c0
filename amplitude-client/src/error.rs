use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to start delivery worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("request could not be sent: {0}")]
    Connection(#[source] reqwest::Error),
    #[error("rate limited by destination: {body}")]
    RateLimited {
        retry_after: Option<Duration>,
        body: String,
    },
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("destination failed with status {status}: {body}")]
    Server {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl DeliveryError {
    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Connection(_)
                | DeliveryError::RateLimited { .. }
                | DeliveryError::Server { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryError::RateLimited { retry_after, .. }
            | DeliveryError::Server { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The HTTP status reported to the callback. Zero when no response was received.
    pub fn status_code(&self) -> u16 {
        match self {
            DeliveryError::RateLimited { .. } => 429,
            DeliveryError::PayloadTooLarge => 413,
            DeliveryError::Server { status, .. } | DeliveryError::Rejected { status, .. } => {
                *status
            }
            DeliveryError::Client(_) | DeliveryError::Spawn(_) | DeliveryError::Connection(_) => {
                0
            }
        }
    }
}
