use std::io::{self, Write};

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::Value;
use tracing::debug;

/// The last STATE value seen, cleared once a record after it is processed.
#[derive(Debug, Default)]
pub struct CheckpointTracker {
    current: Option<Value>,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A null value leaves no checkpoint to emit.
    pub fn observe_state(&mut self, value: Value) {
        debug!("setting state to {}", value);
        self.current = match value {
            Value::Null => None,
            value => Some(value),
        };
    }

    pub fn observe_record_success(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    pub fn into_current(self) -> Option<Value> {
        self.current
    }
}

/// Separates items with `", "` and keys from values with `": "`, and escapes
/// non-ASCII characters, like Python's `json.dumps` defaults.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }

    // Characters outside ASCII become `\uXXXX`, as surrogate pairs beyond the BMP.
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if c.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Writes the checkpoint as one JSON line and flushes. Writes nothing without one.
pub fn emit_state<W: Write>(writer: &mut W, state: Option<&Value>) -> io::Result<()> {
    let Some(state) = state else {
        return Ok(());
    };

    let mut line = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut line, SpacedFormatter);
    state.serialize(&mut serializer).map_err(io::Error::from)?;
    line.push(b'\n');

    debug!("emitting state {}", String::from_utf8_lossy(&line).trim_end());
    writer.write_all(&line)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn emitted(state: Option<&Value>) -> String {
        let mut out = Vec::new();
        emit_state(&mut out, state).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_emit_state_uses_spaced_separators() {
        assert_eq!(emitted(Some(&json!({"bookmark": 1}))), "{\"bookmark\": 1}\n");
        assert_eq!(
            emitted(Some(&json!({"bookmarks": {"a": [1, 2.5, "x"]}, "currently_syncing": null}))),
            "{\"bookmarks\": {\"a\": [1, 2.5, \"x\"]}, \"currently_syncing\": null}\n"
        );
        assert_eq!(emitted(Some(&json!([]))), "[]\n");
        assert_eq!(emitted(Some(&json!({}))), "{}\n");
    }

    #[test]
    fn test_emit_state_escapes_non_ascii() {
        assert_eq!(
            emitted(Some(&json!({"city": "café", "tag": "x\"y"}))),
            "{\"city\": \"caf\\u00e9\", \"tag\": \"x\\\"y\"}\n"
        );
        assert_eq!(
            emitted(Some(&json!({"ключ": "😀 ok"}))),
            "{\"\\u043a\\u043b\\u044e\\u0447\": \"\\ud83d\\ude00 ok\"}\n"
        );
    }

    #[test]
    fn test_emit_nothing_without_state() {
        assert_eq!(emitted(None), "");
    }

    #[test]
    fn test_tracker() {
        let mut tracker = CheckpointTracker::new();
        assert_eq!(tracker.current(), None);

        tracker.observe_state(json!({"bookmark": 1}));
        tracker.observe_state(json!({"bookmark": 2}));
        assert_eq!(tracker.current(), Some(&json!({"bookmark": 2})));

        tracker.observe_record_success();
        assert_eq!(tracker.current(), None);

        tracker.observe_state(json!({"bookmark": 3}));
        tracker.observe_state(Value::Null);
        assert_eq!(tracker.into_current(), None);
    }
}
