use std::path::Path;
use std::str::FromStr;
use std::time;

use amplitude_client::{Callback, ServerZone};
use anyhow::{bail, Context};
use envconfig::Envconfig;
use serde::Deserialize;

use crate::driver::DriverOptions;
use crate::transform::{AttributePolicy, FieldTransformer, Mode};

/// The target's configuration file, passed with `--config`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_key: String,

    #[serde(default = "default_flush_queue_size")]
    pub flush_queue_size: usize,

    #[serde(default = "default_flush_interval_millis")]
    pub flush_interval_millis: u64,

    #[serde(default = "default_flush_max_retries")]
    pub flush_max_retries: u32,

    #[serde(default)]
    pub use_batch: bool,

    /// Records set user properties instead of being tracked as events.
    #[serde(default)]
    pub is_batch_identify: bool,

    /// Only an explicit `false` turns record validation off.
    #[serde(default)]
    pub is_schemaless: Option<bool>,

    #[serde(default)]
    pub unexpected_attributes: AttributePolicy,

    #[serde(default = "default_true")]
    pub strip_pipeline_metadata: bool,

    #[serde(default = "default_true")]
    pub refresh_after_identify: bool,

    #[serde(default)]
    pub defer_dispatch: bool,

    #[serde(default)]
    pub server_zone: ServerZone,

    #[serde(default)]
    pub server_url: Option<String>,
}

fn default_flush_queue_size() -> usize {
    200
}

fn default_flush_interval_millis() -> u64 {
    10_000
}

fn default_flush_max_retries() -> u32 {
    12
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("api_key must not be empty");
        }
        if self.flush_queue_size == 0 {
            bail!("flush_queue_size must be greater than zero");
        }
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        if self.is_batch_identify {
            Mode::Identify
        } else {
            Mode::Track
        }
    }

    pub fn validate_records(&self) -> bool {
        self.is_schemaless != Some(false)
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            mode: self.mode(),
            validate_records: self.validate_records(),
            transformer: FieldTransformer::new(
                self.unexpected_attributes,
                self.strip_pipeline_metadata,
            ),
            refresh_after_identify: self.refresh_after_identify,
            defer_dispatch: self.defer_dispatch,
        }
    }

    /// The delivery client configuration. Environment settings win over the file.
    pub fn client_config(
        &self,
        settings: &Settings,
        callback: Option<Callback>,
    ) -> amplitude_client::Config {
        let mut config = amplitude_client::Config::new(self.api_key.clone());
        config.flush_queue_size = self.flush_queue_size;
        config.flush_interval = time::Duration::from_millis(self.flush_interval_millis);
        config.flush_max_retries = self.flush_max_retries;
        config.use_batch = self.use_batch;
        config.server_zone = self.server_zone;
        config.server_url = settings
            .server_url
            .clone()
            .or_else(|| self.server_url.clone());
        config.request_timeout = settings.request_timeout.0;
        config.callback = callback;
        config
    }
}

/// Operational settings read from the process environment.
#[derive(Envconfig, Clone)]
pub struct Settings {
    #[envconfig(from = "TARGET_AMPLITUDE_REQUEST_TIMEOUT", default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "TARGET_AMPLITUDE_SERVER_URL")]
    pub server_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
