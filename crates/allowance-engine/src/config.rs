//! Engine configuration, loaded from TOML.
//!
//! Every field has a default, so a missing file or an empty table yields a
//! usable configuration.

use std::fs;
use std::io;
use std::path::Path;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::FamilyId;
use crate::tz::parse_timezone;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// ISO 4217 code used when formatting amounts.
    pub currency: String,
    /// Zone whose calendar days bucket the balance history.
    pub display_timezone: String,
    /// Hour of day new rules run at when none is given.
    pub default_hour: u32,
    pub history_window_days: u32,
    pub recent_limit: usize,
    pub family_id: Option<FamilyId>,
    /// Shared secret for signing webhook envelopes.
    pub webhook_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "EUR".into(),
            display_timezone: "UTC".into(),
            default_hour: 8,
            history_window_days: 30,
            recent_limit: 50,
            family_id: None,
            webhook_secret: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a file that does not exist yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "default_hour must be 0-23, got {}",
                self.default_hour
            )));
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        parse_timezone(&self.display_timezone)
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.display_timezone)))
    }
}
