//! Application-level configuration loading: lock expiry, quota window, penalty schedule and
//! broadcaster sizing.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};
use validator::{Validate, ValidationError};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "HUNT_COORDINATOR_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Age after which an unreleased lock is treated as abandoned.
    pub lock_staleness: Duration,
    /// Period of the background stale-lock sweep.
    pub lock_sweep_interval: Duration,
    /// Solves allowed per team inside one quota window.
    pub quota_limit: u32,
    /// Length of a quota window.
    pub quota_slot: Duration,
    /// Escalating penalty per wrong answer, in percent of the question's points.
    /// Its length is the wrong-answer ceiling.
    pub penalty_percentages: Vec<u8>,
    /// Pending events buffered per viewer.
    pub client_queue_capacity: usize,
    /// Events buffered ahead of the dispatch loop.
    pub dispatch_queue_capacity: usize,
    /// Registrations buffered ahead of the dispatch loop.
    pub registration_queue_capacity: usize,
    /// Bound on every enqueue performed by the broadcaster.
    pub delivery_timeout: Duration,
    /// Period of the heartbeat sent on every viewer stream.
    pub heartbeat_interval: Duration,
    /// Pub/sub channel used by the relay.
    pub relay_channel: String,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        quota_limit = app_config.quota_limit,
                        max_wrong_attempts = app_config.max_wrong_attempts(),
                        "loaded coordinator settings from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse and validate a JSON document. Missing keys take their default value.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(contents)?;
        raw.validate()?;
        Ok(raw.into())
    }

    /// Wrong answers accepted per (team, question) before the pair is exhausted.
    pub fn max_wrong_attempts(&self) -> u32 {
        self.penalty_percentages.len() as u32
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

/// Reasons a configuration document is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_schedule"))]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[validate(range(min = 1))]
    lock_staleness_secs: u64,
    #[validate(range(min = 1))]
    lock_sweep_interval_secs: u64,
    #[validate(range(min = 1))]
    quota_limit: u32,
    #[validate(range(min = 1))]
    quota_slot_secs: u64,
    #[validate(range(min = 1))]
    max_wrong_attempts: u32,
    #[validate(length(min = 1))]
    penalty_percentages: Vec<u8>,
    #[validate(range(min = 1))]
    client_queue_capacity: usize,
    #[validate(range(min = 1))]
    dispatch_queue_capacity: usize,
    #[validate(range(min = 1))]
    registration_queue_capacity: usize,
    #[validate(range(min = 1))]
    delivery_timeout_ms: u64,
    #[validate(range(min = 1))]
    heartbeat_interval_secs: u64,
    #[validate(length(min = 1))]
    relay_channel: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            lock_staleness_secs: 10,
            lock_sweep_interval_secs: 60,
            quota_limit: 10,
            quota_slot_secs: 10 * 60 * 60,
            max_wrong_attempts: 5,
            penalty_percentages: vec![0, 10, 30, 50, 70],
            client_queue_capacity: 100,
            dispatch_queue_capacity: 1000,
            registration_queue_capacity: 100,
            delivery_timeout_ms: 100,
            heartbeat_interval_secs: 30,
            relay_channel: "hunt_events".to_owned(),
        }
    }
}

fn validate_schedule(raw: &RawConfig) -> Result<(), ValidationError> {
    if raw.penalty_percentages.len() != raw.max_wrong_attempts as usize {
        return Err(ValidationError::new("penalty_schedule_length")
            .with_message("penalty_percentages needs one entry per allowed wrong attempt".into()));
    }
    if raw.penalty_percentages.iter().any(|percent| *percent > 100) {
        return Err(ValidationError::new("penalty_schedule_range")
            .with_message("penalty percentages must be between 0 and 100".into()));
    }
    Ok(())
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            lock_staleness: Duration::from_secs(value.lock_staleness_secs),
            lock_sweep_interval: Duration::from_secs(value.lock_sweep_interval_secs),
            quota_limit: value.quota_limit,
            quota_slot: Duration::from_secs(value.quota_slot_secs),
            penalty_percentages: value.penalty_percentages,
            client_queue_capacity: value.client_queue_capacity,
            dispatch_queue_capacity: value.dispatch_queue_capacity,
            registration_queue_capacity: value.registration_queue_capacity,
            delivery_timeout: Duration::from_millis(value.delivery_timeout_ms),
            heartbeat_interval: Duration::from_secs(value.heartbeat_interval_secs),
            relay_channel: value.relay_channel,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
