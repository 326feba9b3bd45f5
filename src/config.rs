use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::report::Scenario;

pub const ENV_PREFIX: &str = "REDIS_DEMO_";

/// Settings read from `REDIS_DEMO_*` environment variables.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,
    pub max_records: Option<usize>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub isolate: bool,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    pub set_column: Option<String>,
    pub score_column: Option<String>,
    pub ttl_secs: Option<u64>,
    #[serde(default = "default_increment")]
    pub increment: i64,
    pub publish_count: Option<usize>,
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
    #[serde(default = "default_pipeline_batch")]
    pub pipeline_batch: usize,
    #[serde(default)]
    pub keep_keys: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_owned()
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("data/records.csv")
}

fn default_key_prefix() -> String {
    "showcase".to_owned()
}

fn default_channel() -> String {
    "showcase:records".to_owned()
}

fn default_increment() -> i64 {
    10
}

fn default_subscribe_timeout_ms() -> u64 {
    2000
}

fn default_pipeline_batch() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Config = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Config = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_owned(),
            })
        };

        if self.key_prefix.is_empty() || self.key_prefix.contains(char::is_whitespace) {
            return invalid("key_prefix", "must be non-empty and contain no whitespace");
        }
        if self.channel.trim().is_empty() {
            return invalid("channel", "must not be empty");
        }
        if self.pipeline_batch == 0 {
            return invalid("pipeline_batch", "must be at least 1");
        }
        if self.subscribe_timeout_ms == 0 {
            return invalid("subscribe_timeout_ms", "must be at least 1");
        }
        if self.ttl_secs == Some(0) {
            return invalid("ttl_secs", "must be at least 1 when set");
        }
        if self.max_records == Some(0) {
            return invalid("max_records", "must be at least 1 when set");
        }
        if self.increment == 0 {
            return invalid("increment", "must not be zero");
        }
        if self.publish_count == Some(0) {
            return invalid("publish_count", "must be at least 1 when set");
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return invalid("log_level", "expected trace, debug, info, warn or error");
        }
        Ok(())
    }

    /// Requested scenarios in run order; all of them when none were named.
    pub fn scenarios(&self) -> Vec<Scenario> {
        if self.scenarios.is_empty() {
            return Scenario::ALL.to_vec();
        }
        self.scenarios
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}
