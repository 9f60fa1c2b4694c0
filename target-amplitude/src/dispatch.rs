use amplitude_client::{Event, EventOptions, Identify};
use serde_json::{Map, Value};
use tracing::debug;

use crate::builder::EventBuilder;
use crate::delivery::Delivery;
use crate::error::TargetError;

/// One unit of work for the delivery client.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Track(Event),
    Identify(Identify, EventOptions),
}

/// Builds events from transformed records and hands them to the delivery
/// client, either right away or, when deferred, at end-of-stream.
pub struct Dispatcher<'d> {
    delivery: &'d dyn Delivery,
    builder: EventBuilder,
    defer: bool,
    pending: Vec<Dispatch>,
}

impl<'d> Dispatcher<'d> {
    pub fn new(delivery: &'d dyn Delivery, builder: EventBuilder, defer: bool) -> Self {
        Self {
            delivery,
            builder,
            defer,
            pending: Vec::new(),
        }
    }

    /// Returns how many dispatches the record produced.
    pub fn dispatch(&mut self, fields: Map<String, Value>) -> Result<usize, TargetError> {
        let dispatches = self.builder.build(fields)?;
        let count = dispatches.len();

        if self.defer {
            self.pending.extend(dispatches);
            debug!(pending = self.pending.len(), "deferred dispatch");
        } else {
            for dispatch in dispatches {
                self.send(dispatch);
            }
        }

        Ok(count)
    }

    /// Sends the pending batch in arrival order.
    pub fn drain(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for dispatch in pending {
            self.send(dispatch);
        }
        if count > 0 {
            debug!(count, "drained pending dispatches");
        }
        count
    }

    pub fn pending(&self) -> &[Dispatch] {
        &self.pending
    }

    fn send(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Track(event) => self.delivery.track(event),
            Dispatch::Identify(identify, options) => self.delivery.identify(identify, options),
        }
    }
}
