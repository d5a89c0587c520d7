//! Session configuration.
//!
//! Defaults suit a real pod. Override via environment variables, a YAML
//! file deserialized by the caller, or explicit construction in tests.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pod_core::{InsulinRate, InsulinUnits};

const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_HISTORY_RETENTION: usize = 500;
const DEFAULT_MAX_TEMP_BASAL_RATE: f64 = 30.0;
const DEFAULT_MAX_TEMP_BASAL_MINUTES: u32 = 720;
const DEFAULT_MAX_BOLUS_UNITS: f64 = 30.0;

/// Which command families make the pod beep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeepConfig {
    /// Manual boluses.
    pub bolus: bool,
    /// Automatically issued (super micro) boluses.
    pub smb: bool,
    /// Suspend and resume of basal delivery.
    pub basal: bool,
    /// Temp basal set and cancel.
    pub temp_basal: bool,
}

impl Default for BeepConfig {
    fn default() -> Self {
        Self {
            bolus: true,
            smb: true,
            basal: true,
            temp_basal: true,
        }
    }
}

/// Configuration for one [`SessionCoordinator`](crate::SessionCoordinator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on one transport round trip, in milliseconds.
    pub command_timeout_ms: u64,
    /// History entries kept; `None` keeps everything.
    pub history_retention: Option<usize>,
    /// Highest temp basal rate accepted, in U/h.
    pub max_temp_basal_rate: f64,
    /// Longest temp basal accepted, in minutes.
    pub max_temp_basal_minutes: u32,
    /// Largest bolus accepted, in units.
    pub max_bolus_units: f64,
    /// Beep preferences forwarded with each command.
    pub beeps: BeepConfig,
    /// Log every request/response pair at debug level.
    pub trace_transport: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            history_retention: Some(DEFAULT_HISTORY_RETENTION),
            max_temp_basal_rate: DEFAULT_MAX_TEMP_BASAL_RATE,
            max_temp_basal_minutes: DEFAULT_MAX_TEMP_BASAL_MINUTES,
            max_bolus_units: DEFAULT_MAX_BOLUS_UNITS,
            beeps: BeepConfig::default(),
            trace_transport: false,
        }
    }
}

/// Delivery limits resolved to exact insulin quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryLimits {
    pub max_temp_basal_rate: InsulinRate,
    pub max_temp_basal_minutes: u32,
    pub max_bolus: InsulinUnits,
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `POD_COMMAND_TIMEOUT_SECS` (default: 30)
    /// - `POD_HISTORY_RETENTION` (default: 500; `unbounded` keeps everything)
    /// - `POD_MAX_TEMP_BASAL_RATE` (default: 30.0 U/h)
    /// - `POD_MAX_TEMP_BASAL_MINUTES` (default: 720)
    /// - `POD_MAX_BOLUS_UNITS` (default: 30.0 U)
    /// - `POD_BEEP_BOLUS`, `POD_BEEP_SMB`, `POD_BEEP_BASAL`, `POD_BEEP_TEMP_BASAL` (default: true)
    /// - `POD_TRACE_TRANSPORT` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let timeout_secs: u64 = parse_var(
            &lookup,
            "POD_COMMAND_TIMEOUT_SECS",
            DEFAULT_COMMAND_TIMEOUT_MS / 1000,
        )?;
        let history_retention = match lookup("POD_HISTORY_RETENTION") {
            Some(raw) if raw.trim().eq_ignore_ascii_case("unbounded") => None,
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|e| ConfigError::Invalid {
                var: "POD_HISTORY_RETENTION".to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?),
            None => defaults.history_retention,
        };

        let config = Self {
            command_timeout_ms: timeout_secs.saturating_mul(1000),
            history_retention,
            max_temp_basal_rate: parse_var(&lookup, "POD_MAX_TEMP_BASAL_RATE", defaults.max_temp_basal_rate)?,
            max_temp_basal_minutes: parse_var(
                &lookup,
                "POD_MAX_TEMP_BASAL_MINUTES",
                defaults.max_temp_basal_minutes,
            )?,
            max_bolus_units: parse_var(&lookup, "POD_MAX_BOLUS_UNITS", defaults.max_bolus_units)?,
            beeps: BeepConfig {
                bolus: parse_var(&lookup, "POD_BEEP_BOLUS", defaults.beeps.bolus)?,
                smb: parse_var(&lookup, "POD_BEEP_SMB", defaults.beeps.smb)?,
                basal: parse_var(&lookup, "POD_BEEP_BASAL", defaults.beeps.basal)?,
                temp_basal: parse_var(&lookup, "POD_BEEP_TEMP_BASAL", defaults.beeps.temp_basal)?,
            },
            trace_transport: parse_var(&lookup, "POD_TRACE_TRANSPORT", defaults.trace_transport)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::Validation("command timeout must be > 0".to_string()));
        }
        if self.history_retention == Some(0) {
            return Err(ConfigError::Validation(
                "history retention must be > 0 (omit it for unbounded)".to_string(),
            ));
        }
        if self.max_temp_basal_minutes == 0 {
            return Err(ConfigError::Validation(
                "max temp basal duration must be > 0".to_string(),
            ));
        }
        self.limits().map(|_| ())
    }

    /// The transport timeout as a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Resolve the delivery limits to exact insulin quantities.
    pub fn limits(&self) -> Result<DeliveryLimits, ConfigError> {
        if self.max_temp_basal_rate.is_nan() || self.max_temp_basal_rate <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "max temp basal rate must be > 0, got {}",
                self.max_temp_basal_rate
            )));
        }
        if self.max_bolus_units.is_nan() || self.max_bolus_units <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "max bolus must be > 0, got {}",
                self.max_bolus_units
            )));
        }
        Ok(DeliveryLimits {
            max_temp_basal_rate: InsulinRate::from_units_per_hour(self.max_temp_basal_rate)
                .map_err(|e| ConfigError::Validation(e.to_string()))?,
            max_temp_basal_minutes: self.max_temp_basal_minutes,
            max_bolus: InsulinUnits::from_units(self.max_bolus_units)
                .map_err(|e| ConfigError::Validation(e.to_string()))?,
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: var.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
    #[error("invalid session configuration: {0}")]
    Validation(String),
}
