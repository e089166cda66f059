use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::db::DbConfig;
use crate::scheduler::SchedulerConfig;

/// Configuration errors. These are the only errors fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    Parse {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which record store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown store '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreKind,
    pub database: DbConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` uses the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen_addr: SocketAddr =
            parse_or(&lookup, "LAUNDRY_LISTEN_ADDR", "127.0.0.1:8080".parse().ok())?;

        let log_level = lookup("LAUNDRY_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("LAUNDRY_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let store: StoreKind = parse_or(&lookup, "LAUNDRY_STORE", Some(StoreKind::Postgres))?;

        let database = DbConfig::from_lookup(&lookup);

        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            scan_interval: Duration::from_secs(parse_or(
                &lookup,
                "LAUNDRY_SCAN_INTERVAL_SECS",
                Some(defaults.scan_interval.as_secs()),
            )?),
            service_duration: Duration::from_secs(parse_or(
                &lookup,
                "LAUNDRY_SERVICE_DURATION_SECS",
                Some(defaults.service_duration.as_secs()),
            )?),
            release_retry_attempts: parse_or(
                &lookup,
                "LAUNDRY_RELEASE_RETRY_ATTEMPTS",
                Some(defaults.release_retry_attempts),
            )?,
            release_retry_backoff: Duration::from_millis(parse_or(
                &lookup,
                "LAUNDRY_RELEASE_RETRY_BACKOFF_MS",
                Some(defaults.release_retry_backoff.as_millis() as u64),
            )?),
        };
        scheduler.validate()?;

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            database,
            scheduler,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Option<T>,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Parse {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => default.ok_or(ConfigError::Invalid {
            key,
            reason: "no value and no default".to_string(),
        }),
    }
}
