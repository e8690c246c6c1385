// src/config.rs
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rabbitmq::{RabbitMQError, Result};

const CONFIG_FILE_NAME: &str = "amqp-runnables.json";
const ENV_PREFIX: &str = "AMQP";

/// Settings shared by every consumer and publisher.
///
/// All fields fall back to their defaults when missing from JSON or the
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmqpConfig {
    /// Enable or disable the AMQP runnables.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Publishers connect only once there is something to send.
    #[serde(default = "default_true")]
    pub lazy_transmitter_connect: bool,

    #[serde(default)]
    pub connection_url: Option<String>,

    #[serde(default = "default_exchange_type")]
    pub exchange_type: String,

    /// How long a single tick waits for a delivery or a queued item.
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_ms: u64,

    #[serde(default = "default_backoff_delay")]
    pub backoff_delay_ms: u64,

    /// Maximum shift for the exponential backoff (2^0 .. 2^x).
    #[serde(default = "default_max_backoff_factor")]
    pub max_backoff_factor: u32,

    /// Capacity of the in-memory queue in front of each publisher.
    #[serde(default = "default_publisher_queue_length")]
    pub publisher_queue_length: usize,

    /// How long `offer_with_timeout` waits for space before dropping the item.
    #[serde(default = "default_transmit_timeout")]
    pub transmit_timeout_ms: u64,

    /// Number of unacknowledged messages allowed (0 means no QoS is sent)
    #[serde(default)]
    pub prefetch_count: u16,

    /// Declare the exchange or queue on connect. Turn off when it is known to exist.
    #[serde(default = "default_true")]
    pub declaring: bool,

    #[serde(default)]
    pub durable: bool,

    #[serde(default)]
    pub exclusive: bool,

    #[serde(default)]
    pub auto_delete: bool,
}

// Default values
fn default_true() -> bool { true }
fn default_exchange_type() -> String { "fanout".to_string() }
fn default_tick_timeout() -> u64 { 5000 }
fn default_backoff_delay() -> u64 { 3000 }
fn default_max_backoff_factor() -> u32 { 6 }
fn default_publisher_queue_length() -> usize { 20 }
fn default_transmit_timeout() -> u64 { 10 }

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            lazy_transmitter_connect: default_true(),
            connection_url: None,
            exchange_type: default_exchange_type(),
            tick_timeout_ms: default_tick_timeout(),
            backoff_delay_ms: default_backoff_delay(),
            max_backoff_factor: default_max_backoff_factor(),
            publisher_queue_length: default_publisher_queue_length(),
            transmit_timeout_ms: default_transmit_timeout(),
            prefetch_count: 0,
            declaring: default_true(),
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }
}

impl AmqpConfig {
    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms)
    }

    pub fn backoff_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_delay_ms)
    }

    pub fn transmit_timeout(&self) -> Duration {
        Duration::from_millis(self.transmit_timeout_ms)
    }

    pub fn with_connection_url(mut self, url: impl Into<String>) -> Self {
        self.connection_url = Some(url.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.publisher_queue_length == 0 {
            return Err(RabbitMQError::ConfigurationError(
                "publisher_queue_length must be at least 1".to_string(),
            ));
        }
        if self.max_backoff_factor > 31 {
            return Err(RabbitMQError::ConfigurationError(format!(
                "max_backoff_factor {} exceeds 31",
                self.max_backoff_factor
            )));
        }
        Ok(())
    }

    /// Builds a configuration from the environment (and a `.env` file, if present).
    ///
    /// Each field is looked up as `AMQP_<NAME>_<FIELD>` first and `AMQP_<FIELD>`
    /// second, so one runnable can override the global settings, e.g.
    /// `AMQP_ORDERS_TICK_TIMEOUT_MS=1000` next to `AMQP_TICK_TIMEOUT_MS=5000`.
    pub fn from_env(name: &str) -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(name, |key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(name: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = EnvSource { name, lookup };
        let defaults = Self::default();

        let config = Self {
            enabled: source.parse("ENABLED")?.unwrap_or(defaults.enabled),
            lazy_transmitter_connect: source
                .parse("LAZY_TRANSMITTER_CONNECT")?
                .unwrap_or(defaults.lazy_transmitter_connect),
            connection_url: source.get("CONNECTION_URL").or(defaults.connection_url),
            exchange_type: source.get("EXCHANGE_TYPE").unwrap_or(defaults.exchange_type),
            tick_timeout_ms: source.parse("TICK_TIMEOUT_MS")?.unwrap_or(defaults.tick_timeout_ms),
            backoff_delay_ms: source.parse("BACKOFF_DELAY_MS")?.unwrap_or(defaults.backoff_delay_ms),
            max_backoff_factor: source
                .parse("MAX_BACKOFF_FACTOR")?
                .unwrap_or(defaults.max_backoff_factor),
            publisher_queue_length: source
                .parse("PUBLISHER_QUEUE_LENGTH")?
                .unwrap_or(defaults.publisher_queue_length),
            transmit_timeout_ms: source
                .parse("TRANSMIT_TIMEOUT_MS")?
                .unwrap_or(defaults.transmit_timeout_ms),
            prefetch_count: source.parse("PREFETCH_COUNT")?.unwrap_or(defaults.prefetch_count),
            declaring: source.parse("DECLARING")?.unwrap_or(defaults.declaring),
            durable: source.parse("DURABLE")?.unwrap_or(defaults.durable),
            exclusive: source.parse("EXCLUSIVE")?.unwrap_or(defaults.exclusive),
            auto_delete: source.parse("AUTO_DELETE")?.unwrap_or(defaults.auto_delete),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file at {}", path.display()))?;

        let config: AmqpConfig = serde_json::from_str(&content)
            .context("Configuration file contains invalid JSON")?;

        config.validate()?;
        Ok(config)
    }
}

struct EnvSource<'a, F> {
    name: &'a str,
    lookup: F,
}

impl<F> EnvSource<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, field: &str) -> Option<String> {
        let scoped = format!(
            "{}_{}_{}",
            ENV_PREFIX,
            env_segment(self.name),
            field
        );
        (self.lookup)(&scoped).or_else(|| (self.lookup)(&format!("{}_{}", ENV_PREFIX, field)))
    }

    fn parse<T>(&self, field: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(field) {
            Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| {
                RabbitMQError::ConfigurationError(format!("{} = {:?}: {}", field, raw, e))
            }),
            None => Ok(None),
        }
    }
}

/// `test-queue` -> `TEST_QUEUE`
fn env_segment(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

pub fn find_config_file() -> anyhow::Result<PathBuf> {
    let config_dir = Path::new("config").join(CONFIG_FILE_NAME);
    let locations = [
        ("Current directory", PathBuf::from(CONFIG_FILE_NAME)),
        ("Current directory (alternative)", config_dir),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(path.to_path_buf());
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(home_config);
        }
    }

    Err(anyhow!(
        "Could not find {} in the current directory, config/ or your home directory",
        CONFIG_FILE_NAME
    ))
}

pub fn load_config() -> anyhow::Result<AmqpConfig> {
    let path = find_config_file()?;
    AmqpConfig::from_json_file(&path)
}
