use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::notifier::DEFAULT_COOLDOWN;

const DEFAULT_DATABASE_URL: &str = "sqlite://taskboard.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is not valid: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub overdue_check_interval: Duration,
    pub reminder_cooldown: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let bind_raw = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "BIND_ADDR",
                value: bind_raw.clone(),
                reason: e.to_string(),
            })?;

        let overdue_check_interval = seconds(
            &lookup,
            "OVERDUE_CHECK_INTERVAL_SECS",
            Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
        )?;
        let reminder_cooldown = seconds(&lookup, "REMINDER_COOLDOWN_SECS", DEFAULT_COOLDOWN)?;

        Ok(Self {
            database_url,
            bind_addr,
            overdue_check_interval,
            reminder_cooldown,
        })
    }
}

fn seconds<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}
