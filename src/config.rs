//! Runtime configuration.
//!
//! Configuration is read from an optional TOML file, then overridden by
//! `FRAGCAST_*` environment variables, then validated. Every field has a
//! default so an empty file (or no file at all) yields a usable setup.

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    backoff::BackoffConfig,
    fragment::{DEFAULT_CHUNK_SIZE, Fragmenter, MAX_CHUNK_SIZE},
    keys::KeyDeriver,
    transport::SubscribeOptions,
};

/// Environment variable overriding [`FragcastConfig::chunk_size`].
pub const ENV_CHUNK_SIZE: &str = "FRAGCAST_CHUNK_SIZE";
/// Environment variable overriding [`IngestConfig::workers`].
pub const ENV_INGEST_WORKERS: &str = "FRAGCAST_INGEST_WORKERS";
/// Environment variable overriding the ingest subscription's in-flight bound.
pub const ENV_MAX_IN_FLIGHT: &str = "FRAGCAST_MAX_IN_FLIGHT";
/// Environment variable overriding the ingest subscription's ack wait.
pub const ENV_ACK_WAIT_MS: &str = "FRAGCAST_ACK_WAIT_MS";
/// Environment variable overriding [`StoreConfig::ttl_secs`].
pub const ENV_STORE_TTL_SECS: &str = "FRAGCAST_STORE_TTL_SECS";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML for [`FragcastConfig`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// An environment override does not parse as the expected type.
    #[error("environment variable {var}={value:?} is invalid")]
    Env { var: &'static str, value: String },
    /// A field holds a value outside its permitted range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Bus subjects used by broadcasters and workers.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Subjects {
    /// Subject carrying reassembly headers.
    pub reassembly: String,
    /// Subject carrying fragments.
    pub fragment_ingest: String,
}

impl Default for Subjects {
    fn default() -> Self {
        Self {
            reassembly: "fragcast.reassembly".to_owned(),
            fragment_ingest: "fragcast.fragments.ingest".to_owned(),
        }
    }
}

/// Settings for the fragment ingestion worker pool.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Number of concurrent subscriber workers.
    pub workers: usize,
    /// Queue group shared by the workers.
    pub queue_group: String,
    /// Milliseconds a delivery may stay unsettled before redelivery.
    pub ack_wait_ms: u64,
    /// Unsettled deliveries allowed per worker.
    pub max_in_flight: usize,
    /// Delivery attempts before a fragment is dead-lettered.
    pub max_deliveries: u32,
    /// Delay before a nacked fragment is redelivered.
    pub redeliver_after_ms: u64,
    /// Count each fragment index once per operation.
    pub dedupe_redeliveries: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_group: "fragcast-ingest".to_owned(),
            ack_wait_ms: 30_000,
            max_in_flight: 64,
            max_deliveries: 5,
            redeliver_after_ms: 1_000,
            dedupe_redeliveries: true,
        }
    }
}

impl IngestConfig {
    /// Subscription settings for ingest workers.
    #[must_use]
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            ack_wait: Duration::from_millis(self.ack_wait_ms),
            max_in_flight: self.max_in_flight,
            max_deliveries: self.max_deliveries,
        }
    }

    /// Delay requested when nacking a fragment.
    #[must_use]
    pub fn redeliver_after(&self) -> Duration { Duration::from_millis(self.redeliver_after_ms) }
}

/// Settings for the reassembly worker.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReassemblyConfig {
    /// Queue group for header subscribers.
    pub queue_group: String,
    /// Milliseconds a header delivery may stay unsettled.
    pub ack_wait_ms: u64,
    /// Unsettled headers allowed at once.
    pub max_in_flight: usize,
    /// Header delivery attempts before an operation is abandoned.
    pub max_deliveries: u32,
    /// First polling delay.
    pub poll_initial_ms: u64,
    /// Polling delay ceiling.
    pub poll_max_ms: u64,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            queue_group: "fragcast-reassembly".to_owned(),
            ack_wait_ms: 30_000,
            max_in_flight: 64,
            max_deliveries: 60,
            poll_initial_ms: 50,
            poll_max_ms: 2_000,
        }
    }
}

impl ReassemblyConfig {
    /// Subscription settings for the header subscriber.
    #[must_use]
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            ack_wait: Duration::from_millis(self.ack_wait_ms),
            max_in_flight: self.max_in_flight,
            max_deliveries: self.max_deliveries,
        }
    }

    /// Polling schedule for operations that are not ready.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.poll_initial_ms),
            max_delay: Duration::from_millis(self.poll_max_ms),
        }
        .normalized()
    }
}

/// Broadcaster settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BroadcastConfig {
    /// Maximum fragments published per second. Unlimited when absent.
    pub publish_rate: Option<NonZeroUsize>,
}

/// Store settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Retention for persisted fragments and cached headers.
    pub ttl_secs: Option<u64>,
}

impl StoreConfig {
    /// Retention as a [`Duration`].
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> { self.ttl_secs.map(Duration::from_secs) }
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FragcastConfig {
    /// Namespace mixed into every store key.
    pub namespace: String,
    /// Maximum fragment payload in bytes.
    pub chunk_size: usize,
    pub subjects: Subjects,
    pub ingest: IngestConfig,
    pub reassembly: ReassemblyConfig,
    pub broadcast: BroadcastConfig,
    pub store: StoreConfig,
    /// Address for the Prometheus exporter, if any.
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for FragcastConfig {
    fn default() -> Self {
        Self {
            namespace: "fragcast".to_owned(),
            chunk_size: DEFAULT_CHUNK_SIZE.get(),
            subjects: Subjects::default(),
            ingest: IngestConfig::default(),
            reassembly: ReassemblyConfig::default(),
            broadcast: BroadcastConfig::default(),
            store: StoreConfig::default(),
            metrics_listen: None,
        }
    }
}

impl FragcastConfig {
    /// Load configuration from `path` (or defaults), apply environment
    /// overrides and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, an
    /// override is malformed, or the merged configuration is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown fields.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> { Ok(toml::from_str(text)?) }

    /// Apply `FRAGCAST_*` overrides, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if a set variable does not parse.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(value) = parse_env(&lookup, ENV_CHUNK_SIZE)? {
            self.chunk_size = value;
        }
        if let Some(value) = parse_env(&lookup, ENV_INGEST_WORKERS)? {
            self.ingest.workers = value;
        }
        if let Some(value) = parse_env(&lookup, ENV_MAX_IN_FLIGHT)? {
            self.ingest.max_in_flight = value;
        }
        if let Some(value) = parse_env(&lookup, ENV_ACK_WAIT_MS)? {
            self.ingest.ack_wait_ms = value;
        }
        if let Some(value) = parse_env(&lookup, ENV_STORE_TTL_SECS)? {
            self.store.ttl_secs = Some(value);
        }
        Ok(())
    }

    /// Check ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));
        if self.chunk_size == 0 {
            return invalid("chunk_size must be non-zero");
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must not exceed {MAX_CHUNK_SIZE} bytes"
            )));
        }
        if self.subjects.reassembly.is_empty() || self.subjects.fragment_ingest.is_empty() {
            return invalid("subjects must not be empty");
        }
        if self.subjects.reassembly == self.subjects.fragment_ingest {
            return invalid("reassembly and fragment_ingest subjects must differ");
        }
        if self.ingest.workers == 0 {
            return invalid("ingest.workers must be at least one");
        }
        if self.ingest.max_in_flight == 0 || self.reassembly.max_in_flight == 0 {
            return invalid("max_in_flight must be at least one");
        }
        if self.ingest.max_deliveries == 0 || self.reassembly.max_deliveries == 0 {
            return invalid("max_deliveries must be at least one");
        }
        if self.ingest.ack_wait_ms == 0 || self.reassembly.ack_wait_ms == 0 {
            return invalid("ack_wait_ms must be non-zero");
        }
        Ok(())
    }

    /// Build a fragmenter using the configured chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `chunk_size` is zero.
    pub fn fragmenter(&self) -> Result<Fragmenter, ConfigError> {
        NonZeroUsize::new(self.chunk_size)
            .map(Fragmenter::new)
            .ok_or_else(|| ConfigError::Invalid("chunk_size must be non-zero".to_owned()))
    }

    /// Key deriver for the configured namespace.
    #[must_use]
    pub fn key_deriver(&self) -> KeyDeriver { KeyDeriver::new(self.namespace.clone()) }
}

fn parse_env<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Env { var, value })
}
