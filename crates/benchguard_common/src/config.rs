//! Runtime configuration.
//!
//! Configuration comes from the environment (`BENCHGUARD_*` variables layered
//! over the defaults) or from a JSON document. Every section has a
//! [`Default`] so partial documents are accepted.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{EquipmentType, SafetyLimits};

/// Bounded retry of individual commands.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// When false every command is a single attempt
    pub enabled: bool,
    /// Retries after the first attempt
    ///
    /// ## Default
    /// 3
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry
    ///
    /// ## Default
    /// 100 ms
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 100,
        }
    }
}

/// Reconnection of equipment found offline.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// ## Default
    /// 5
    pub max_attempts: u32,
    /// ## Default
    /// 1000 ms
    pub base_delay_ms: u64,
    /// ## Default
    /// 2.0
    pub backoff_multiplier: f64,
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Periodic fleet polling.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    /// Pause between sweeps; must be at least one second
    ///
    /// ## Default
    /// 30 s
    pub interval_secs: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

/// Default limits applied to newly registered equipment, by type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    pub oscilloscope: SafetyLimits,
    pub power_supply: SafetyLimits,
    pub electronic_load: SafetyLimits,
}

impl SafetyConfig {
    pub fn limits_for(&self, equipment_type: EquipmentType) -> SafetyLimits {
        match equipment_type {
            EquipmentType::Oscilloscope => self.oscilloscope,
            EquipmentType::PowerSupply => self.power_supply,
            EquipmentType::ElectronicLoad => self.electronic_load,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            oscilloscope: SafetyLimits::factory_default(EquipmentType::Oscilloscope),
            power_supply: SafetyLimits::factory_default(EquipmentType::PowerSupply),
            electronic_load: SafetyLimits::factory_default(EquipmentType::ElectronicLoad),
        }
    }
}

/// Top-level configuration for the control-plane.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    pub retry: RetryConfig,
    pub reconnect: ReconnectConfig,
    pub health_check: HealthCheckConfig,
    /// Upper bound on a single driver call made by the command path
    ///
    /// ## Default
    /// 5000 ms
    pub command_timeout_ms: u64,
    pub safety: SafetyConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            reconnect: ReconnectConfig::default(),
            health_check: HealthCheckConfig::default(),
            command_timeout_ms: 5000,
            safety: SafetyConfig::default(),
        }
    }
}

impl GuardConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Parses a JSON document; missing sections keep their defaults.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate("health_check.interval_secs")?;
        Ok(config)
    }

    /// Defaults overridden by `BENCHGUARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `BENCHGUARD_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        override_bool(&lookup, "BENCHGUARD_RETRY_ENABLED", &mut config.retry.enabled)?;
        override_parsed(&lookup, "BENCHGUARD_RETRY_COUNT", &mut config.retry.max_retries)?;
        override_parsed(&lookup, "BENCHGUARD_RETRY_DELAY_MS", &mut config.retry.base_delay_ms)?;

        override_bool(&lookup, "BENCHGUARD_RECONNECT_ENABLED", &mut config.reconnect.enabled)?;
        override_parsed(&lookup, "BENCHGUARD_RECONNECT_ATTEMPTS", &mut config.reconnect.max_attempts)?;
        override_parsed(&lookup, "BENCHGUARD_RECONNECT_DELAY_MS", &mut config.reconnect.base_delay_ms)?;
        override_parsed(
            &lookup,
            "BENCHGUARD_RECONNECT_BACKOFF",
            &mut config.reconnect.backoff_multiplier,
        )?;

        override_bool(&lookup, "BENCHGUARD_HEALTH_CHECK_ENABLED", &mut config.health_check.enabled)?;
        override_parsed(
            &lookup,
            "BENCHGUARD_HEALTH_CHECK_INTERVAL_SECS",
            &mut config.health_check.interval_secs,
        )?;

        override_parsed(&lookup, "BENCHGUARD_COMMAND_TIMEOUT_MS", &mut config.command_timeout_ms)?;

        config.validate("BENCHGUARD_HEALTH_CHECK_INTERVAL_SECS")?;
        Ok(config)
    }

    /// A zero interval would run sweeps back to back.
    fn validate(&self, interval_key: &str) -> Result<(), ConfigError> {
        if self.health_check.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: interval_key.to_string(),
                value: "0".to_string(),
                reason: "interval must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }
}

fn override_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    *target = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    Ok(())
}

fn override_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut bool,
) -> Result<(), ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    *target = match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
                reason: "expected a boolean".to_string(),
            });
        }
    };
    Ok(())
}
