//! Bridge configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `timebridge.toml` in the project directory
//! 3. `timebridge.local.toml` in the project directory (local overrides)
//! 4. Explicit files added with [`ConfigLoader::with_file`]
//! 5. Environment variables (`TIMEBRIDGE__BUDGET__MAX_NETWORK_DELAY_US=...`)
//!
//! Durations are integer microseconds.
//!
//! ```toml
//! [budget]
//! request_deadline_us = 10000
//! max_network_delay_us = 5000
//! max_sync_error_us = 1000
//!
//! [events]
//! cache_depth = 100
//! ordering = "monotonic"
//!
//! [methods]
//! correlation = "by_request_id"
//! eviction = "fail_fast"
//! pending_timeout_us = 500000
//!
//! [transactors.brake_status]
//! max_network_delay_us = 2000
//! ```

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transactor::{DEFAULT_CACHE_DEPTH, ProxyEventOptions, SkeletonMethodOptions};
use crate::{ConfigError, CorrelationPolicy, DeliveryOrdering, EvictionPolicy, TimingBudget};

/// Project config file name.
pub const PROJECT_CONFIG_FILE: &str = "timebridge.toml";

/// Local override file name.
pub const LOCAL_CONFIG_FILE: &str = "timebridge.local.toml";

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "TIMEBRIDGE";

/// Main timebridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub budget: BudgetConfig,
    pub events: EventConfig,
    pub methods: MethodConfig,
    /// Budget overrides keyed by transactor name.
    pub transactors: HashMap<String, BudgetOverride>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub request_deadline_us: u64,
    pub max_network_delay_us: u64,
    pub max_sync_error_us: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let budget = TimingBudget::default();
        Self {
            request_deadline_us: micros(budget.request_deadline),
            max_network_delay_us: micros(budget.max_network_delay),
            max_sync_error_us: micros(budget.max_sync_error),
        }
    }
}

/// Per-transactor budget fields; unset fields inherit from [`BudgetConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetOverride {
    pub request_deadline_us: Option<u64>,
    pub max_network_delay_us: Option<u64>,
    pub max_sync_error_us: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub cache_depth: usize,
    pub ordering: DeliveryOrdering,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            cache_depth: DEFAULT_CACHE_DEPTH,
            ordering: DeliveryOrdering::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodConfig {
    pub correlation: CorrelationPolicy,
    pub eviction: EvictionPolicy,
    pub pending_timeout_us: Option<u64>,
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl BridgeConfig {
    /// Parses a TOML document on top of the defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Budget for the transactor called `name`, with its overrides applied.
    pub fn budget_for(&self, name: &str) -> TimingBudget {
        let base = self.budget;
        let over = self.transactors.get(name).copied().unwrap_or_default();
        TimingBudget {
            request_deadline: Duration::from_micros(over.request_deadline_us.unwrap_or(base.request_deadline_us)),
            max_network_delay: Duration::from_micros(over.max_network_delay_us.unwrap_or(base.max_network_delay_us)),
            max_sync_error: Duration::from_micros(over.max_sync_error_us.unwrap_or(base.max_sync_error_us)),
        }
    }

    pub fn proxy_event_options(&self, name: &str) -> ProxyEventOptions {
        ProxyEventOptions {
            budget: self.budget_for(name),
            cache_depth: self.events.cache_depth,
            ordering: self.events.ordering,
        }
    }

    pub fn skeleton_method_options(&self, name: &str) -> SkeletonMethodOptions {
        SkeletonMethodOptions {
            budget: self.budget_for(name),
            correlation: self.methods.correlation,
            eviction: self.methods.eviction,
            pending_timeout: self.methods.pending_timeout_us.map(Duration::from_micros),
        }
    }

    /// Checks every budget and limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.budget_for("").validate()?;
        for name in self.transactors.keys() {
            self.budget_for(name)
                .validate()
                .map_err(|error| ConfigError::Invalid(format!("transactor {name}: {error}")))?;
        }
        if self.events.cache_depth == 0 {
            return Err(ConfigError::Invalid("events.cache_depth must be at least 1".to_string()));
        }
        if self.methods.pending_timeout_us == Some(0) {
            return Err(ConfigError::Invalid(
                "methods.pending_timeout_us must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Configuration loader with builder pattern.
pub struct ConfigLoader {
    project_dir: PathBuf,
    files: Vec<PathBuf>,
    env_prefix: String,
    env_source: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    /// Creates a loader rooted at the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            files: Vec::new(),
            env_prefix: ENV_PREFIX.to_string(),
            env_source: None,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Adds a required TOML file, applied after the project files.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets the environment variable prefix (default: "TIMEBRIDGE").
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Reads environment overrides from `vars` instead of the process environment.
    pub fn with_env_source(mut self, vars: config::Map<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    /// Loads configuration from all sources with proper precedence.
    pub fn load(self) -> Result<BridgeConfig, ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&BridgeConfig::default())?);

        for name in [PROJECT_CONFIG_FILE, LOCAL_CONFIG_FILE] {
            let path = self.project_dir.join(name);
            if path.exists() {
                builder = builder.add_source(
                    config::File::from(path)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        for path in self.files {
            if !path.exists() {
                return Err(ConfigError::Read {
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
                    path,
                });
            }
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(self.env_source),
        );

        let config: BridgeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            lookahead_us = micros(config.budget_for("").lookahead()),
            overrides = config.transactors.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Loads configuration or returns defaults if loading fails.
    pub fn load_or_default(self) -> BridgeConfig {
        self.load().unwrap_or_else(|error| {
            tracing::warn!(%error, "falling back to default configuration");
            BridgeConfig::default()
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
