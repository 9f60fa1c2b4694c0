use std::io;
use std::path::PathBuf;

use amplitude_client::Amplitude;
use anyhow::Context;
use clap::Parser;
use envconfig::Envconfig;
use tracing::debug;

use crate::checkpoint::emit_state;
use crate::config::{Config, Settings};
use crate::delivery::logging_callback;
use crate::driver::StreamDriver;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(short, long)]
    config: PathBuf,
}

impl Cli {
    pub fn run() -> anyhow::Result<()> {
        let cli = Cli::parse();
        let config = Config::load(&cli.config)?;
        let settings = Settings::init_from_env().context("Failed to read environment settings")?;

        let state = {
            let client = Amplitude::new(config.client_config(&settings, Some(logging_callback())))
                .context("Failed to start the Amplitude client")?;
            let driver = StreamDriver::new(&client, config.driver_options());
            driver.run(io::stdin().lock())?
        };

        emit_state(&mut io::stdout().lock(), state.as_ref()).context("Failed to write state")?;

        debug!("exiting normally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_flag() {
        let cli = Cli::try_parse_from(["target-amplitude", "-c", "config.json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));

        let cli = Cli::try_parse_from(["target-amplitude", "--config", "/etc/t.json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/t.json"));
    }

    #[test]
    fn test_config_flag_is_required() {
        assert!(Cli::try_parse_from(["target-amplitude"]).is_err());
    }
}
