use std::io::BufRead;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::builder::EventBuilder;
use crate::checkpoint::CheckpointTracker;
use crate::delivery::Delivery;
use crate::dispatch::Dispatcher;
use crate::error::TargetError;
use crate::message::{self, Message, RecordMessage};
use crate::schema::SchemaRegistry;
use crate::transform::{FieldTransformer, Mode};

/// How records are turned into events.
#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    pub mode: Mode,
    pub validate_records: bool,
    pub transformer: FieldTransformer,
    pub refresh_after_identify: bool,
    pub defer_dispatch: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Track,
            validate_records: true,
            transformer: FieldTransformer::default(),
            refresh_after_identify: true,
            defer_dispatch: false,
        }
    }
}

/// Asks the delivery client to flush when dropped, so every message ends with
/// a flush whichever way its processing exits.
struct FlushGuard<'d> {
    delivery: &'d dyn Delivery,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.delivery.flush();
    }
}

/// Processes one input stream from start to end.
pub struct StreamDriver<'d> {
    delivery: &'d dyn Delivery,
    registry: SchemaRegistry,
    checkpoint: CheckpointTracker,
    dispatcher: Dispatcher<'d>,
    options: DriverOptions,
}

impl<'d> StreamDriver<'d> {
    pub fn new(delivery: &'d dyn Delivery, options: DriverOptions) -> Self {
        let builder = EventBuilder::new(options.mode, options.refresh_after_identify);
        Self {
            delivery,
            registry: SchemaRegistry::new(),
            checkpoint: CheckpointTracker::new(),
            dispatcher: Dispatcher::new(delivery, builder, options.defer_dispatch),
            options,
        }
    }

    /// Consumes `input` line by line and returns the checkpoint to emit.
    ///
    /// The first failing message aborts the run. The delivery client is shut
    /// down only when the whole input was processed.
    pub fn run<R: BufRead>(mut self, mut input: R) -> Result<Option<Value>, TargetError> {
        let mut line = Vec::new();
        loop {
            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            self.process_line(&line)?;
        }

        Ok(self.finish())
    }

    /// Processes one raw input line, newline included or not.
    pub fn process_line(&mut self, line: &[u8]) -> Result<(), TargetError> {
        let _flush = FlushGuard {
            delivery: self.delivery,
        };

        self.process_bytes(line).inspect_err(|e| {
            error!(
                kind = e.kind(),
                stage = ?e.stage(),
                "failed to process message: {}\n{}",
                e,
                String::from_utf8_lossy(line).trim_end()
            );
        })
    }

    pub fn checkpoint(&self) -> Option<&Value> {
        self.checkpoint.current()
    }

    /// Sends deferred dispatches, shuts the delivery client down and returns
    /// the last checkpoint.
    pub fn finish(mut self) -> Option<Value> {
        self.dispatcher.drain();
        self.delivery.shutdown();
        self.checkpoint.into_current()
    }

    fn process_bytes(&mut self, line: &[u8]) -> Result<(), TargetError> {
        let line = std::str::from_utf8(line)?.trim_end();
        if line.is_empty() {
            return Ok(());
        }

        self.process(line)
    }

    fn process(&mut self, line: &str) -> Result<(), TargetError> {
        match message::decode(line)? {
            Message::Record(record) => self.process_record(record),
            Message::Schema(schema) => {
                if self.registry.contains(&schema.stream) {
                    debug!(stream = %schema.stream, "replacing schema");
                }
                self.registry
                    .register(&schema.stream, schema.schema, schema.key_properties)
            }
            Message::State(state) => {
                self.checkpoint.observe_state(state.value);
                Ok(())
            }
            Message::Unknown { tag } => {
                warn!("unknown message type {} in message {}", tag, line);
                Ok(())
            }
        }
    }

    fn process_record(&mut self, record: RecordMessage) -> Result<(), TargetError> {
        let RecordMessage { stream, record } = record;

        if self.options.validate_records {
            self.registry.validate(&stream, &record)?;
        } else {
            self.registry.require(&stream)?;
        }

        let fields = self.options.transformer.transform(record, self.options.mode)?;
        let count = self.dispatcher.dispatch(fields)?;
        debug!(
            stream = %stream,
            key_properties = ?self.registry.key_properties(&stream),
            count,
            "processed record"
        );

        self.checkpoint.observe_record_success();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use amplitude_client::{Event, EventOptions, Identify};
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct CountingDelivery {
        events: Mutex<Vec<Event>>,
        flushes: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl Delivery for CountingDelivery {
        fn track(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }

        fn identify(&self, identify: Identify, options: EventOptions) {
            self.track(identify.into_event(options));
        }

        fn flush(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    const SCHEMA: &str = r#"{"type": "SCHEMA", "stream": "events", "schema": {"type": "object", "properties": {"event_type": {"type": "string"}, "user_id": {"type": "string"}}}, "key_properties": []}"#;
    const RECORD: &str = r#"{"type": "RECORD", "stream": "events", "record": {"event_type": "login", "user_id": "abcde"}}"#;

    #[test]
    fn test_flushes_after_every_message() {
        let delivery = CountingDelivery::default();
        let mut driver = StreamDriver::new(&delivery, DriverOptions::default());

        driver.process_line(SCHEMA.as_bytes()).unwrap();
        driver.process_line(RECORD.as_bytes()).unwrap();
        driver.process_line(b"\n").unwrap();
        assert!(driver.process_line(b"{oops").is_err());

        assert_eq!(delivery.flushes.load(Ordering::SeqCst), 4);
        assert_eq!(delivery.events.lock().unwrap().len(), 1);
        assert_eq!(delivery.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unvalidated_records_still_need_a_schema() {
        let delivery = CountingDelivery::default();
        let options = DriverOptions {
            validate_records: false,
            ..Default::default()
        };
        let mut driver = StreamDriver::new(&delivery, options);

        let err = driver.process_line(RECORD.as_bytes()).unwrap_err();
        assert!(matches!(err, TargetError::UnknownStream(stream) if stream == "events"));

        driver
            .process_line(br#"{"type": "SCHEMA", "stream": "events", "schema": {"type": "object", "properties": {"user_id": {"type": "integer"}}}, "key_properties": []}"#)
            .unwrap();
        driver.process_line(RECORD.as_bytes()).unwrap();
        assert_eq!(delivery.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_message_type_is_skipped() {
        let delivery = CountingDelivery::default();
        let mut driver = StreamDriver::new(&delivery, DriverOptions::default());

        driver
            .process_line(br#"{"type": "ACTIVATE_VERSION", "stream": "events", "version": 1}"#)
            .unwrap();
        driver
            .process_line(br#"{"type": "STATE", "value": {"bookmark": 1}}"#)
            .unwrap();

        assert_eq!(driver.checkpoint(), Some(&json!({"bookmark": 1})));
        assert_eq!(driver.finish(), Some(json!({"bookmark": 1})));
        assert_eq!(delivery.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_record_keeps_checkpoint() {
        let delivery = CountingDelivery::default();
        let mut driver = StreamDriver::new(&delivery, DriverOptions::default());

        driver.process_line(SCHEMA.as_bytes()).unwrap();
        driver
            .process_line(br#"{"type": "STATE", "value": {"bookmark": 1}}"#)
            .unwrap();
        let err = driver
            .process_line(br#"{"type": "RECORD", "stream": "events", "record": {"event_type": "login", "user_id": "abc"}}"#)
            .unwrap_err();

        assert_eq!(err.kind(), "InvalidIdentityError");
        assert_eq!(driver.checkpoint(), Some(&json!({"bookmark": 1})));
        assert!(delivery.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let delivery = CountingDelivery::default();
        let mut driver = StreamDriver::new(&delivery, DriverOptions::default());

        let err = driver.process_line(b"\xff\xfe\n").unwrap_err();
        assert!(matches!(err, TargetError::Encoding(_)));
        assert_eq!(err.kind(), "DecodeError");
        assert_eq!(delivery.flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_stops_at_invalid_utf8_line() {
        let delivery = CountingDelivery::default();
        let driver = StreamDriver::new(&delivery, DriverOptions::default());

        let mut input = Vec::new();
        input.extend_from_slice(SCHEMA.as_bytes());
        input.extend_from_slice(b"\r\n");
        input.extend_from_slice(br#"{"type": "STATE", "value": {"note": "caf"#);
        input.extend_from_slice(b"\xe9\"}}\n");
        input.extend_from_slice(RECORD.as_bytes());

        let err = driver.run(Cursor::new(input)).unwrap_err();
        assert_eq!(err.kind(), "DecodeError");
        assert_eq!(delivery.flushes.load(Ordering::SeqCst), 2);
        assert!(delivery.events.lock().unwrap().is_empty());
        assert_eq!(delivery.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_accepts_crlf_and_missing_final_newline() {
        let delivery = CountingDelivery::default();
        let driver = StreamDriver::new(&delivery, DriverOptions::default());

        let input = format!("{SCHEMA}\r\n\r\n{RECORD}");
        assert_eq!(driver.run(Cursor::new(input)).unwrap(), None);
        assert_eq!(delivery.events.lock().unwrap().len(), 1);
        assert_eq!(delivery.flushes.load(Ordering::SeqCst), 3);
        assert_eq!(delivery.shutdowns.load(Ordering::SeqCst), 1);
    }
}
