//! Runner configuration, assembled from environment variables plus CLI
//! overrides. Everything downstream (client, retry, driver) receives an
//! explicit config value; nothing reads the environment after startup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::client::ClientConfig;
use crate::driver::DriverConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-70b-instruct";

/// Top-level runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub client: ClientConfig,
    pub retry: RetryPolicy,
    pub driver: DriverConfig,
    pub checkpoint_every: usize,
    pub output_dir: PathBuf,
}

impl RunnerConfig {
    /// Build from the environment. `MAD_API_KEY` is required; everything
    /// else has a default (`MAD_BASE_URL`, `MAD_MODEL`, `MAD_TIMEOUT_SECS`).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("MAD_API_KEY")
            .context("MAD_API_KEY must be set to an API key for the completion provider")?;
        let base_url =
            std::env::var("MAD_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("MAD_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let timeout_secs: u64 = match std::env::var("MAD_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("MAD_TIMEOUT_SECS is not a number: '{raw}'"))?,
            Err(_) => 120,
        };

        Ok(Self {
            client: ClientConfig {
                base_url,
                api_key,
                model,
                timeout: Duration::from_secs(timeout_secs),
            },
            retry: RetryPolicy::default(),
            driver: DriverConfig::default(),
            checkpoint_every: 10,
            output_dir: PathBuf::from("results"),
        })
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.client.api_key.trim().is_empty(),
            "api key must not be empty"
        );
        anyhow::ensure!(
            self.client.base_url.starts_with("http"),
            "base url '{}' does not look like an http endpoint",
            self.client.base_url
        );
        anyhow::ensure!(self.driver.rounds <= 2, "round count must be 0, 1 or 2");
        anyhow::ensure!(self.checkpoint_every > 0, "checkpoint interval must be at least 1");
        anyhow::ensure!(self.retry.max_retries > 0, "retry budget must be at least 1");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunnerConfig {
        RunnerConfig {
            client: ClientConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                api_key: "k".to_string(),
                model: DEFAULT_MODEL.to_string(),
                timeout: Duration::from_secs(120),
            },
            retry: RetryPolicy::default(),
            driver: DriverConfig::default(),
            checkpoint_every: 10,
            output_dir: PathBuf::from("results"),
        }
    }

    #[test]
    fn test_default_shape_validates() {
        config().validate().unwrap();
    }

    #[test]
    fn test_rejects_round_count_over_two() {
        let mut c = config();
        c.driver.rounds = 3;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_checkpoint_interval() {
        let mut c = config();
        c.checkpoint_every = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rejects_blank_api_key() {
        let mut c = config();
        c.client.api_key = "  ".to_string();
        assert!(c.validate().is_err());
    }
}
