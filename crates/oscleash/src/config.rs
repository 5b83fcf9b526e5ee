// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Leash configuration (`config.json`).

use oscquery::DEFAULT_TARGET_PREFIX;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Prefix of every avatar parameter address.
pub const PARAMETER_PREFIX: &str = "/avatar/parameters/";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Avatar parameter names the leash reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterAliases {
    #[serde(rename = "Z_Positive", default = "default_z_positive")]
    pub z_positive: String,

    #[serde(rename = "Z_Negative", default = "default_z_negative")]
    pub z_negative: String,

    #[serde(rename = "X_Positive", default = "default_x_positive")]
    pub x_positive: String,

    #[serde(rename = "X_Negative", default = "default_x_negative")]
    pub x_negative: String,

    /// Physbone base name; `_IsGrabbed` and `_Stretch` are appended.
    #[serde(rename = "PhysboneParameter", default = "default_physbone")]
    pub physbone: String,
}

fn default_z_positive() -> String {
    "Leash_Z+".into()
}

fn default_z_negative() -> String {
    "Leash_Z-".into()
}

fn default_x_positive() -> String {
    "Leash_X+".into()
}

fn default_x_negative() -> String {
    "Leash_X-".into()
}

fn default_physbone() -> String {
    "Leash".into()
}

impl Default for ParameterAliases {
    fn default() -> Self {
        Self {
            z_positive: default_z_positive(),
            z_negative: default_z_negative(),
            x_positive: default_x_positive(),
            x_negative: default_x_negative(),
            physbone: default_physbone(),
        }
    }
}

/// Full OSC addresses of the tracked leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeashAddresses {
    pub z_positive: String,
    pub z_negative: String,
    pub x_positive: String,
    pub x_negative: String,
    pub grabbed: String,
    pub stretch: String,
}

impl ParameterAliases {
    pub fn addresses(&self) -> LeashAddresses {
        let param = |name: &str| format!("{}{}", PARAMETER_PREFIX, name);
        LeashAddresses {
            z_positive: param(&self.z_positive),
            z_negative: param(&self.z_negative),
            x_positive: param(&self.x_positive),
            x_negative: param(&self.x_negative),
            grabbed: param(&format!("{}_IsGrabbed", self.physbone)),
            stretch: param(&format!("{}_Stretch", self.physbone)),
        }
    }
}

/// Leash configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeashConfig {
    /// Address advertised and bound (default: 127.0.0.1)
    #[serde(default = "default_ip")]
    pub ip: String,

    /// Stretch above which the avatar runs
    #[serde(default = "default_run_deadzone")]
    pub run_deadzone: f32,

    /// Stretch above which the avatar walks
    #[serde(default = "default_walk_deadzone")]
    pub walk_deadzone: f32,

    /// Sleep after every tick, in seconds
    #[serde(default = "default_active_delay")]
    pub active_delay: f32,

    /// Idle wait and release gap, in seconds
    #[serde(default = "default_inactive_delay")]
    pub inactive_delay: f32,

    /// Log every emitted command at info level
    #[serde(default)]
    pub logging: bool,

    /// Fixed ports 9001/9000 and no discovery wait
    #[serde(default)]
    pub debug_mode: bool,

    /// Instance prefix of the peer to follow
    #[serde(default = "default_target_prefix")]
    pub target_prefix: String,

    #[serde(default)]
    pub parameters: ParameterAliases,
}

fn default_ip() -> String {
    "127.0.0.1".into()
}

fn default_run_deadzone() -> f32 {
    0.70
}

fn default_walk_deadzone() -> f32 {
    0.15
}

fn default_active_delay() -> f32 {
    0.1
}

fn default_inactive_delay() -> f32 {
    0.15
}

fn default_target_prefix() -> String {
    DEFAULT_TARGET_PREFIX.into()
}

impl Default for LeashConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            run_deadzone: default_run_deadzone(),
            walk_deadzone: default_walk_deadzone(),
            active_delay: default_active_delay(),
            inactive_delay: default_inactive_delay(),
            logging: false,
            debug_mode: false,
            target_prefix: default_target_prefix(),
            parameters: ParameterAliases::default(),
        }
    }
}

impl LeashConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            info!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        let config = Self::default();
        config.to_file(path)?;
        info!("Wrote default config to {}", path.display());
        Ok(config)
    }

    pub fn ip_addr(&self) -> Result<IpAddr, ConfigError> {
        self.ip
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("Ip {:?} is not an address", self.ip)))
    }

    pub fn active_delay(&self) -> Duration {
        Duration::try_from_secs_f32(self.active_delay).unwrap_or_default()
    }

    pub fn inactive_delay(&self) -> Duration {
        Duration::try_from_secs_f32(self.inactive_delay).unwrap_or_default()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ip_addr()?;

        for (name, value) in [
            ("RunDeadzone", self.run_deadzone),
            ("WalkDeadzone", self.walk_deadzone),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.walk_deadzone > self.run_deadzone {
            return Err(ConfigError::InvalidValue(format!(
                "WalkDeadzone {} exceeds RunDeadzone {}",
                self.walk_deadzone, self.run_deadzone
            )));
        }

        for (name, value) in [
            ("ActiveDelay", self.active_delay),
            ("InactiveDelay", self.inactive_delay),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
        }

        let aliases = &self.parameters;
        for (name, value) in [
            ("Z_Positive", &aliases.z_positive),
            ("Z_Negative", &aliases.z_negative),
            ("X_Positive", &aliases.x_positive),
            ("X_Negative", &aliases.x_negative),
            ("PhysboneParameter", &aliases.physbone),
        ] {
            if value.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "Parameters.{} cannot be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}
