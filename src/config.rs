// File: ./src/config.rs
// Handles configuration loading, saving, and defaults.
use crate::context::AppContext;
use crate::model::{Coordinates, School};
use crate::storage::LocalStorage;
use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;

fn default_method() -> u32 {
    2
}
fn default_api_base_url() -> String {
    "https://api.aladhan.com/v1".to_string()
}
fn default_request_timeout() -> u64 {
    15
}
fn default_remind_later() -> u64 {
    600
}
fn default_settle_delay() -> u64 {
    250
}
fn default_background_interval() -> u32 {
    60
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default = "default_method")]
    pub calculation_method: u32,
    #[serde(default)]
    pub school: School,

    // Hosts without a location sensor use these.
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Delay of the follow-up notification scheduled by "remind later".
    #[serde(default = "default_remind_later")]
    pub remind_later_secs: u64,
    /// Pause after cancelling triggers before new ones are installed.
    #[serde(default = "default_settle_delay")]
    pub cancel_settle_ms: u64,
    /// Minimum-interval hint handed to the background host.
    #[serde(default = "default_background_interval")]
    pub background_interval_mins: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calculation_method: 2,
            school: School::Shafi,
            latitude: None,
            longitude: None,
            api_base_url: default_api_base_url(),
            request_timeout_secs: 15,
            remind_later_secs: 600,
            cancel_settle_ms: 250,
            background_interval_mins: 60,
        }
    }
}

impl Config {
    /// Load the configuration from disk using an explicit context.
    pub fn load(ctx: &dyn AppContext) -> Result<Self> {
        let path = ctx.get_config_file_path()?;

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found"));
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;

        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(ctx: &dyn AppContext) -> Result<Self> {
        match Self::load(ctx) {
            Ok(cfg) => Ok(cfg),
            Err(e) if Self::is_missing_config_error(&e) => {
                log::info!("No config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Detects whether an error means the config file was missing, either via
    /// our explicit message or an underlying IO NotFound anywhere in the chain.
    pub fn is_missing_config_error(err: &Error) -> bool {
        if err.to_string().contains("Config file not found") {
            return true;
        }

        for cause in err.chain() {
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>()
                && io_err.kind() == std::io::ErrorKind::NotFound
            {
                return true;
            }
        }

        false
    }

    pub fn save(&self, ctx: &dyn AppContext) -> Result<()> {
        let path = ctx.get_config_file_path()?;
        LocalStorage::with_lock(&path, || {
            let toml_str = toml::to_string_pretty(self)?;
            LocalStorage::atomic_write(&path, toml_str)?;
            Ok(())
        })?;
        Ok(())
    }

    /// The configured fixed location, if both coordinates are set.
    pub fn fixed_location(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }
}
