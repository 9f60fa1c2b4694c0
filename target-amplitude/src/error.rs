use serde_json::Value;
use thiserror::Error;

/// The stage of the per-record pipeline an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decode,
    Validate,
    Transform,
    Dispatch,
    Output,
}

#[derive(Error, Debug)]
pub enum TargetError {
    #[error("message is not well-formed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("message is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("a record for stream {0} was encountered before a corresponding schema")]
    UnknownStream(String),
    #[error("schema for stream {stream} cannot be compiled: {message}")]
    InvalidSchema { stream: String, message: String },
    #[error("record for stream {stream} does not match its schema: {}", .errors.join("; "))]
    SchemaViolation { stream: String, errors: Vec<String> },
    #[error("no user_id or device_id in record")]
    MissingIdentity,
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("time {0} is not formatted as YYYY-MM-DDTHH:MM:SS+00:00")]
    TimestampFormat(String),
    #[error("revenue {0} cannot be converted to a number")]
    NumericCoercion(Value),
    #[error("unexpected event property key: {0}")]
    UnexpectedAttribute(String),
    #[error("event_type must be specified")]
    MissingEventType,
    #[error("user_property must be a non-empty object")]
    MissingUserProperties,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TargetError {
    /// Stable name of the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TargetError::Decode(_) | TargetError::Encoding(_) => "DecodeError",
            TargetError::UnknownStream(_) => "UnknownStreamError",
            TargetError::InvalidSchema { .. } => "InvalidSchemaError",
            TargetError::SchemaViolation { .. } => "SchemaViolationError",
            TargetError::MissingIdentity => "MissingIdentityError",
            TargetError::InvalidIdentity(_) => "InvalidIdentityError",
            TargetError::TimestampFormat(_) => "TimestampFormatError",
            TargetError::NumericCoercion(_) => "NumericCoercionError",
            TargetError::UnexpectedAttribute(_) => "UnexpectedAttributeError",
            TargetError::MissingEventType => "MissingEventTypeError",
            TargetError::MissingUserProperties => "MissingUserPropertiesError",
            TargetError::Io(_) => "IoError",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            TargetError::Decode(_) | TargetError::Encoding(_) => Stage::Decode,
            TargetError::UnknownStream(_)
            | TargetError::InvalidSchema { .. }
            | TargetError::SchemaViolation { .. } => Stage::Validate,
            TargetError::MissingIdentity
            | TargetError::InvalidIdentity(_)
            | TargetError::TimestampFormat(_)
            | TargetError::NumericCoercion(_)
            | TargetError::UnexpectedAttribute(_) => Stage::Transform,
            TargetError::MissingEventType | TargetError::MissingUserProperties => Stage::Dispatch,
            TargetError::Io(_) => Stage::Output,
        }
    }
}
