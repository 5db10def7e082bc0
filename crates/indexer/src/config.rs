//! Configuration management for the unlwatch indexer.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables (`UNLWATCH_DATABASE_URL`, `UNLWATCH_RIPPLED_RPC_URL`
//!   override the file)
//! - Default values (fallbacks)
//!
//! The loaded [`Config`] is immutable; components receive it (or the parts
//! they need) at construction.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use unlwatch_core::PublicKey;

use crate::unl::UnlSource;

/// Environment variable overriding `database.url`.
pub const ENV_DATABASE_URL: &str = "UNLWATCH_DATABASE_URL";

/// Environment variable overriding `rippled.rpc_url`.
pub const ENV_RIPPLED_RPC_URL: &str = "UNLWATCH_RIPPLED_RPC_URL";

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Networks and their validator list publishers
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,

    /// Ledger node used for manifest lookups
    pub rippled: RippledConfig,

    /// Outbound fetch limits
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Job intervals
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Domain verification
    #[serde(default)]
    pub domain_verification: DomainVerificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://unlwatch.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// One network (e.g. `main`, `test`) and the publishers it trusts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name
    pub name: String,

    /// Validator list publishers
    #[serde(default)]
    pub unls: Vec<UnlSourceConfig>,
}

/// A validator list publisher endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlSourceConfig {
    /// Endpoint URL
    pub url: String,

    /// Pinned publisher master key (`nH…` or hex)
    pub publisher_key: String,
}

/// Ledger node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RippledConfig {
    /// JSON-RPC endpoint (admin port, `manifest` method)
    pub rpc_url: String,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Outbound fetch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent requests per job
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout for validator list fetches
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Largest response body accepted
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

/// Job intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Validator list refresh interval
    #[serde(default = "default_unl_interval_secs")]
    pub unl_interval_secs: u64,

    /// Manifest refresh interval (both manifest jobs)
    #[serde(default = "default_manifest_interval_secs")]
    pub manifest_interval_secs: u64,

    /// Domain verification interval
    #[serde(default = "default_domain_interval_secs")]
    pub domain_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            unl_interval_secs: default_unl_interval_secs(),
            manifest_interval_secs: default_manifest_interval_secs(),
            domain_interval_secs: default_domain_interval_secs(),
        }
    }
}

/// Domain verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainVerificationConfig {
    /// Run the domain verification job
    #[serde(default = "default_domain_enabled")]
    pub enabled: bool,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DomainVerificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_domain_enabled(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_concurrency() -> usize {
    8
}

fn default_max_response_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_unl_interval_secs() -> u64 {
    300
}

fn default_manifest_interval_secs() -> u64 {
    600
}

fn default_domain_interval_secs() -> u64 {
    3600
}

fn default_domain_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// # Example
    /// ```no_run
    /// # use unlwatch_indexer::config::Config;
    /// let config = Config::from_file("unlwatch.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Replace values with those found by `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()) {
            self.database.url = url;
        }
        if let Some(url) = lookup(ENV_RIPPLED_RPC_URL).filter(|v| !v.trim().is_empty()) {
            self.rippled.rpc_url = url;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.rippled.rpc_url.trim().is_empty() {
            anyhow::bail!("Rippled rpc_url cannot be empty");
        }
        reqwest::Url::parse(&self.rippled.rpc_url)
            .with_context(|| format!("Invalid rippled rpc_url: {}", self.rippled.rpc_url))?;

        if self.fetch.concurrency == 0 {
            anyhow::bail!("Fetch concurrency must be > 0");
        }
        if self.fetch.max_response_bytes == 0 {
            anyhow::bail!("Fetch max_response_bytes must be > 0");
        }
        if self.fetch.timeout_secs == 0
            || self.rippled.timeout_secs == 0
            || self.domain_verification.timeout_secs == 0
        {
            anyhow::bail!("Timeouts must be > 0");
        }

        if self.schedule.unl_interval_secs == 0
            || self.schedule.manifest_interval_secs == 0
            || self.schedule.domain_interval_secs == 0
        {
            anyhow::bail!("Schedule intervals must be > 0");
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            anyhow::bail!(
                "Logging format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            );
        }

        // Attribution is keyed by source id, so two endpoints must not share one.
        let mut urls_by_id: HashMap<String, &str> = HashMap::new();
        for network in &self.networks {
            if network.name.trim().is_empty() {
                anyhow::bail!("Network name cannot be empty");
            }
            for unl in &network.unls {
                reqwest::Url::parse(&unl.url)
                    .with_context(|| format!("Invalid UNL url in network {}: {}", network.name, unl.url))?;
                let publisher_key = unl
                    .publisher_key
                    .parse::<PublicKey>()
                    .with_context(|| format!("Invalid publisher_key for {}", unl.url))?;

                let id = UnlSource::new(&unl.url, &network.name, publisher_key).id;
                match urls_by_id.get(&id) {
                    Some(other) if *other != unl.url => anyhow::bail!(
                        "UNL urls {other} and {} share source id {id}; use one endpoint per host",
                        unl.url
                    ),
                    Some(_) => {}
                    None => {
                        urls_by_id.insert(id, &unl.url);
                    }
                }
            }
        }

        Ok(())
    }

    /// Every configured publisher endpoint, first occurrence of each URL kept.
    pub fn unl_sources(&self) -> Result<Vec<UnlSource>> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();

        for network in &self.networks {
            for unl in &network.unls {
                if !seen.insert(unl.url.clone()) {
                    continue;
                }
                let publisher_key = unl
                    .publisher_key
                    .parse::<PublicKey>()
                    .with_context(|| format!("Invalid publisher_key for {}", unl.url))?;
                sources.push(UnlSource::new(&unl.url, &network.name, publisher_key));
            }
        }

        Ok(sources)
    }
}
