use log::{info, warn};
use std::env;
use thiserror::Error;

use crate::bluetooth::filter::UNITY_SERVICE;

const DEFAULT_SUMMARY_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// 16-bit service identifier carried in the service data
    pub service_uuid: u16,
    /// Report every advertisement instead of coalescing duplicates
    pub allow_duplicates: bool,
    pub adapter_name: Option<String>,
    pub summary_interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            service_uuid: UNITY_SERVICE,
            allow_duplicates: true,
            adapter_name: None,
            summary_interval_secs: DEFAULT_SUMMARY_INTERVAL_SECS,
        }
    }
}

impl ScanConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();

        let config = Self::from_lookup(|key| env::var(key).ok())?;
        info!(
            "Scanning for service {:04X} (duplicates {}), adapter {}",
            config.service_uuid,
            if config.allow_duplicates { "allowed" } else { "filtered" },
            config.adapter_name.as_deref().unwrap_or("default")
        );
        Ok(config)
    }

    /// Build the configuration from a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("SERVICE_UUID") {
            config.service_uuid = parse_hex_u16("SERVICE_UUID", &value)?;
        }

        if let Some(value) = lookup("ALLOW_DUPLICATES") {
            config.allow_duplicates = parse_bool("ALLOW_DUPLICATES", &value)?;
            if !config.allow_duplicates {
                warn!("Duplicate filtering enabled, repeated samples may be coalesced");
            }
        }

        config.adapter_name = lookup("BLUETOOTH_ADAPTER")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        if let Some(value) = lookup("SUMMARY_INTERVAL_SECS") {
            config.summary_interval_secs = match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SUMMARY_INTERVAL_SECS",
                        value,
                        reason: "expected a positive number of seconds",
                    })
                }
            };
        }

        Ok(config)
    }
}

fn parse_hex_u16(key: &'static str, value: &str) -> Result<u16, ConfigError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    u16::from_str_radix(digits, 16).map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: "expected a 16-bit hex value",
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected true or false",
        }),
    }
}
