//! # petrel-runner
//!
//! Tick runner for petrel.
//!
//! This crate provides:
//! - Layered configuration (defaults, YAML file, environment)
//! - Net definition loading from disk
//! - The tick loop with cooperative shutdown and run reports

pub mod config;
pub mod error;
pub mod runner;

pub use config::{Config, DefinitionConfig, ReportConfig, SchedulerConfig};
pub use error::{ConfigError, RunnerError};
pub use runner::{load_definition, RunReport, Runner};
