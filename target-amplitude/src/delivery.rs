use std::sync::Arc;

use amplitude_client::{Amplitude, Callback, Event, EventOptions, Identify};
use tracing::{info, warn};

/// Where built events go. Implementations own batching and transmission.
pub trait Delivery {
    fn track(&self, event: Event);
    fn identify(&self, identify: Identify, options: EventOptions);
    /// Best-effort request to send what is queued. Must not block on the network.
    fn flush(&self);
    /// Sends everything still queued and releases resources.
    fn shutdown(&self);
}

impl Delivery for Amplitude {
    fn track(&self, event: Event) {
        Amplitude::track(self, event);
    }

    fn identify(&self, identify: Identify, options: EventOptions) {
        Amplitude::identify(self, identify, options);
    }

    fn flush(&self) {
        Amplitude::flush(self);
    }

    fn shutdown(&self) {
        Amplitude::shutdown(self);
    }
}

/// Logs the final outcome of each event's delivery.
pub fn log_delivery(event: &Event, status: u16, message: Option<&str>) {
    let message = message.unwrap_or_default();
    if (200..300).contains(&status) {
        info!(
            event_type = %event.event_type,
            user_id = event.user_id.as_deref().unwrap_or_default(),
            status,
            message,
            "event delivered"
        );
    } else {
        warn!(
            event_type = %event.event_type,
            user_id = event.user_id.as_deref().unwrap_or_default(),
            status,
            message,
            "event not delivered: {:?}",
            event
        );
    }
}

pub fn logging_callback() -> Callback {
    Arc::new(log_delivery)
}
