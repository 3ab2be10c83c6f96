//! Environment-driven configuration.
//!
//! Variables (a `.env` file in the working directory is loaded first):
//!   KEYLEDGER_PORT                 - Listen port (default: 3000)
//!   KEYLEDGER_DATABASE             - SQLite path, ":memory:" for ephemeral (default: ./keyledger.db)
//!   KEYLEDGER_SWEEP_INTERVAL_SECS  - Seconds between expiry sweeps (default: 3600)
//!   KEYLEDGER_SWEEP_ENABLED        - Run the sweeper inside the API process (default: true)
//!   KEYLEDGER_EXPIRY_WARNING_DAYS  - Warn about keys expiring this soon, 0 disables, max 36500 (default: 0)
//!   KEYLEDGER_KEY_TYPE_DELETE      - "reject" or "cascade" (default: reject)
//!   KEYLEDGER_AUDIT_LOG            - Hash-chained JSON-lines audit file (default: unset)
//!   KEYLEDGER_LOG_FORMAT           - "json" for structured logging, "pretty" for dev

use keyledger::cryptoperiod::MAX_DAYS;
use keyledger_store::{KeyTypeDeletePolicy, LifecyclePolicy, SweeperConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const IN_MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {var}={value:?}: {message}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err("expected json or pretty".into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub database: String,
    pub sweep_interval: Duration,
    pub sweep_enabled: bool,
    pub expiry_warning_days: u32,
    pub key_type_delete: KeyTypeDeletePolicy,
    pub audit_log: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database: "./keyledger.db".into(),
            sweep_interval: Duration::from_secs(3600),
            sweep_enabled: true,
            expiry_warning_days: 0,
            key_type_delete: KeyTypeDeletePolicy::Reject,
            audit_log: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load from the process environment, after applying `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset or blank variables keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let sweep_secs: u64 = parse(&get, "KEYLEDGER_SWEEP_INTERVAL_SECS")?
            .unwrap_or(defaults.sweep_interval.as_secs());
        if sweep_secs == 0 {
            return Err(ConfigError {
                var: "KEYLEDGER_SWEEP_INTERVAL_SECS",
                value: "0".into(),
                message: "must be at least 1".into(),
            });
        }

        let expiry_warning_days: u32 = parse(&get, "KEYLEDGER_EXPIRY_WARNING_DAYS")?
            .unwrap_or(defaults.expiry_warning_days);
        if expiry_warning_days > MAX_DAYS {
            return Err(ConfigError {
                var: "KEYLEDGER_EXPIRY_WARNING_DAYS",
                value: expiry_warning_days.to_string(),
                message: format!("must be at most {}", MAX_DAYS),
            });
        }

        Ok(Self {
            port: parse(&get, "KEYLEDGER_PORT")?.unwrap_or(defaults.port),
            database: get("KEYLEDGER_DATABASE").unwrap_or(defaults.database),
            sweep_interval: Duration::from_secs(sweep_secs),
            sweep_enabled: parse_bool(&get, "KEYLEDGER_SWEEP_ENABLED")?
                .unwrap_or(defaults.sweep_enabled),
            expiry_warning_days,
            key_type_delete: parse(&get, "KEYLEDGER_KEY_TYPE_DELETE")?
                .unwrap_or(defaults.key_type_delete),
            audit_log: get("KEYLEDGER_AUDIT_LOG").map(PathBuf::from),
            log_format: parse(&get, "KEYLEDGER_LOG_FORMAT")?.unwrap_or(defaults.log_format),
        })
    }

    pub fn is_in_memory(&self) -> bool {
        self.database == IN_MEMORY_DATABASE
    }

    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            key_type_delete: self.key_type_delete,
            ..LifecyclePolicy::default()
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: self.sweep_interval,
            warn_within: (self.expiry_warning_days > 0)
                .then(|| chrono::Duration::days(i64::from(self.expiry_warning_days))),
        }
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(var)
        .map(|value| match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError {
                var,
                message: e.to_string(),
                value,
            }),
        })
        .transpose()
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<bool>, ConfigError> {
    get(var)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError {
                var,
                value,
                message: "expected true or false".into(),
            }),
        })
        .transpose()
}
