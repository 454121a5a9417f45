use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Environment variable prefix; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "BUILDMASTER_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid poll_interval_secs: {0}. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Invalid {name}: {value}s. Must not be shorter than poll_interval_secs ({poll}s)")]
    IntervalBelowPoll { name: &'static str, value: u64, poll: u64 },

    #[error("Invalid timeout_secs: {timeout}. Must be greater than stall_timeout_secs ({stall})")]
    TimeoutNotAboveStall { timeout: u64, stall: u64 },

    #[error("Build program cannot be empty")]
    EmptyBuildProgram,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid port: 0")]
    InvalidPort,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .buildmaster/config.yaml
    /// 3. .buildmaster/local.yaml (optional local overrides)
    /// 4. Environment variables (BUILDMASTER_* prefix)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".buildmaster/config.yaml"))
            .merge(Yaml::file(".buildmaster/local.yaml"))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment variables still
    /// override the file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let monitor = &config.monitor;
        if monitor.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval(monitor.poll_interval_secs));
        }

        for (name, value) in [
            ("stall_timeout_secs", monitor.stall_timeout_secs),
            ("health_check_interval_secs", monitor.health_check_interval_secs),
        ] {
            if value < monitor.poll_interval_secs {
                return Err(ConfigError::IntervalBelowPoll {
                    name,
                    value,
                    poll: monitor.poll_interval_secs,
                });
            }
        }

        if monitor.timeout_secs <= monitor.stall_timeout_secs {
            return Err(ConfigError::TimeoutNotAboveStall {
                timeout: monitor.timeout_secs,
                stall: monitor.stall_timeout_secs,
            });
        }

        if config.build.program.trim().is_empty() {
            return Err(ConfigError::EmptyBuildProgram);
        }

        for (name, dir) in [
            ("paths.log_dir", &config.paths.log_dir),
            ("paths.data_dir", &config.paths.data_dir),
            ("paths.working_dir", &config.paths.working_dir),
        ] {
            if dir.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!("{name} cannot be empty")));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}
