//! A Singer target that forwards records to Amplitude.
//!
//! SCHEMA, RECORD and STATE messages are read line by line. Records are
//! validated against the latest schema of their stream, turned into events or
//! identify updates and handed to the delivery client. The last checkpoint is
//! written back once the input ends.
pub mod builder;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod message;
pub mod schema;
pub mod transform;

pub use error::TargetError;
