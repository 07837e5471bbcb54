//! Runner configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PETREL_CONFIG or --config)
//! 3. Environment variables

use crate::error::ConfigError;
use petrel_core::NetConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on dedicated tick workers.
pub const MAX_WORKER_THREADS: usize = 1024;

/// Runner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduling configuration.
    pub scheduler: SchedulerConfig,
    /// Net definition source.
    pub net: DefinitionConfig,
    /// Reporting configuration.
    pub report: ReportConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    ///
    /// Without an explicit `path`, the file named by PETREL_CONFIG is used if set.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("PETREL_CONFIG").ok().map(PathBuf::from));
        if let Some(path) = path {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.scheduler.apply_env_overrides();
        self.net.apply_env_overrides();
        self.report.apply_env_overrides();
    }

    /// Checks the configuration before a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.net.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

fn env_flag(value: &str) -> bool {
    value == "1" || value.to_lowercase() == "true"
}

/// Scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Dedicated tick workers (0 = shared global pool).
    pub worker_threads: usize,
    /// Name prefix for dedicated workers.
    pub thread_name_prefix: String,
    /// Tick transitions in parallel rather than in registration order.
    pub parallel: bool,
    /// Pause between rounds in milliseconds (0 = back-to-back).
    pub tick_interval_ms: u64,
    /// Stop after this many rounds (0 = until shutdown).
    pub max_ticks: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name_prefix: "petrel-tick".to_string(),
            parallel: true,
            tick_interval_ms: 0,
            max_ticks: 0,
        }
    }
}

impl SchedulerConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(workers) = std::env::var("PETREL_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.worker_threads = n;
            }
        }

        if let Ok(parallel) = std::env::var("PETREL_PARALLEL") {
            self.parallel = env_flag(&parallel);
        }

        if let Ok(interval) = std::env::var("PETREL_TICK_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.tick_interval_ms = ms;
            }
        }

        if let Ok(max) = std::env::var("PETREL_MAX_TICKS") {
            if let Ok(n) = max.parse() {
                self.max_ticks = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel && self.worker_threads > MAX_WORKER_THREADS {
            return Err(ConfigError::ValidationError(format!(
                "worker_threads {} exceeds the limit of {}",
                self.worker_threads, MAX_WORKER_THREADS
            )));
        }
        Ok(())
    }

    /// Returns the pause between rounds, if any.
    pub fn tick_interval(&self) -> Option<Duration> {
        match self.tick_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Returns the pool configuration for the net.
    pub fn net_config(&self) -> NetConfig {
        NetConfig::new()
            .with_worker_threads(self.worker_threads)
            .with_thread_name_prefix(self.thread_name_prefix.clone())
    }
}

/// Net definition source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionConfig {
    /// Path to a YAML or JSON net definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_path: Option<PathBuf>,
}

impl DefinitionConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("PETREL_NET") {
            self.definition_path = Some(PathBuf::from(path));
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.definition_path.is_none() {
            return Err(ConfigError::ValidationError(
                "net.definition_path not set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reporting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Log totals every N rounds (0 = only at the end).
    pub log_every_ticks: u64,
    /// Print the final report as JSON.
    pub json: bool,
}

impl ReportConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(every) = std::env::var("PETREL_REPORT_EVERY") {
            if let Ok(n) = every.parse() {
                self.log_every_ticks = n;
            }
        }

        if let Ok(json) = std::env::var("PETREL_REPORT_JSON") {
            self.json = env_flag(&json);
        }
    }
}
