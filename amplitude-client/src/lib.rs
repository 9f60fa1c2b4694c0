//! A small batching client for the Amplitude HTTP ingestion APIs.
//!
//! Events are queued on a single background worker which sends them in
//! batches, retrying transient failures, and reports every final outcome
//! through an optional callback.
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
mod transport;

pub use client::Amplitude;
pub use config::{Callback, Config, ServerZone};
pub use error::DeliveryError;
pub use event::{Event, EventOptions, Identify};
