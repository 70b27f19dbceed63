//! Configuration loading and types for the artifact publisher.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: the object store connection, publishing layout, logging, and
//! observability.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::publish::retry::{Backoff, RetryPolicy};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Object store connection and upload pool settings.
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Publishing layout settings.
    #[serde(default)]
    pub publishing: PublishingConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Object store connection configuration.
///
/// `access_key` / `secret_key` also accept the AWS-style
/// `access_key_id` / `secret_access_key` spellings.
#[derive(Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// Client implementation: `s3` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Store host, optionally with scheme (e.g. `http://localhost`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Store port, appended to the endpoint.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Static access key.
    #[serde(alias = "access_key_id", default)]
    pub access_key: String,

    /// Static secret key.
    #[serde(alias = "secret_access_key", default)]
    pub secret_key: String,

    /// Target bucket.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Signing region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Size of the upload worker pool (core = max).
    #[serde(alias = "max_number_of_s3_threads", default = "default_max_workers")]
    pub max_number_of_workers: usize,

    /// Per-attempt timeout for a single store call in seconds (0 = none).
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Retry policy applied to every store call.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl std::fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("max_number_of_workers", &self.max_number_of_workers)
            .field("attempt_timeout_secs", &self.attempt_timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: default_endpoint(),
            port: default_port(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: default_bucket(),
            region: default_region(),
            max_number_of_workers: default_max_workers(),
            attempt_timeout_secs: default_attempt_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl ObjectStoreConfig {
    /// Per-attempt timeout, if one is configured.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_secs > 0).then(|| Duration::from_secs(self.attempt_timeout_secs))
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay strategy between attempts.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Random spread applied to each delay, as a fraction in `[0, 1]`.
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffConfig::default(),
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Build the runtime retry policy.
    pub fn policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffConfig::Fixed { delay_ms } => Backoff::Fixed {
                delay: Duration::from_millis(delay_ms),
            },
            BackoffConfig::Exponential {
                base_ms,
                multiplier,
                max_ms,
            } => Backoff::Exponential {
                base: Duration::from_millis(base_ms),
                multiplier,
                max_delay: Duration::from_millis(max_ms),
            },
        };
        RetryPolicy::new(self.max_attempts, backoff).with_jitter(self.jitter)
    }
}

/// Backoff strategy as written in YAML (`kind: fixed | exponential`).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffConfig {
    /// Same delay before every retry.
    Fixed {
        #[serde(default = "default_base_ms")]
        delay_ms: u64,
    },
    /// `base * multiplier^(n-1)`, capped at `max_ms`.
    Exponential {
        #[serde(default = "default_base_ms")]
        base_ms: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(default = "default_max_delay_ms")]
        max_ms: u64,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Exponential {
            base_ms: default_base_ms(),
            multiplier: default_multiplier(),
            max_ms: default_max_delay_ms(),
        }
    }
}

/// Publishing layout configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Prefix of the artifact category this publisher writes
    /// (e.g. the DCC revocation list directory).
    #[serde(alias = "dcc_list_path", default = "default_list_path")]
    pub list_path: String,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            list_path: default_list_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_backend() -> String {
    "s3".to_string()
}

fn default_endpoint() -> String {
    "http://localhost".to_string()
}

fn default_port() -> u16 {
    8003
}

fn default_bucket() -> String {
    "cwa".to_string()
}

fn default_region() -> String {
    "eu-central-1".to_string()
}

fn default_max_workers() -> usize {
    4
}

fn default_attempt_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_ms() -> u64 {
    200
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_list_path() -> String {
    "dcc-rl".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    validate(&config)?;
    Ok(config)
}

/// Reject configurations the publisher cannot run with.
pub fn validate(config: &Config) -> anyhow::Result<()> {
    let store = &config.object_store;
    if store.max_number_of_workers < 1 {
        anyhow::bail!("object_store.max_number_of_workers must be at least 1");
    }
    if store.retry.max_attempts < 1 {
        anyhow::bail!("object_store.retry.max_attempts must be at least 1");
    }
    if !(0.0..=1.0).contains(&store.retry.jitter) {
        anyhow::bail!("object_store.retry.jitter must be between 0 and 1");
    }
    if let BackoffConfig::Exponential { multiplier, .. } = store.retry.backoff {
        if multiplier < 1.0 {
            anyhow::bail!("object_store.retry.backoff.multiplier must be at least 1.0");
        }
    }
    match store.backend.as_str() {
        "s3" | "memory" => {}
        other => anyhow::bail!("unknown object_store.backend '{other}' (expected s3 or memory)"),
    }
    Ok(())
}

// -- Tests -------------------------------------------------------------------
