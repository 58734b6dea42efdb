// src/config.rs
use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be a positive number, got {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub reconcile_interval: Duration,
    pub dispatch_batch_size: i64,
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            port: parse_var("PORT", 3030)?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 5)?,
            reconcile_interval: Duration::from_secs(parse_var("RECONCILE_INTERVAL_SECS", 60)?),
            dispatch_batch_size: parse_var("DISPATCH_BATCH_SIZE", 500)?,
            shutdown_grace: Duration::from_secs(parse_var("SHUTDOWN_GRACE_SECS", 10)?),
        })
    }
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match env::var(name) {
        Ok(raw) => parse_positive(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_positive<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_positive_numbers() {
        let secs: u64 = parse_positive("RECONCILE_INTERVAL_SECS", " 30 ").unwrap();
        assert_eq!(secs, 30);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!(parse_positive::<u64>("RECONCILE_INTERVAL_SECS", "0").is_err());
        assert!(parse_positive::<i64>("DISPATCH_BATCH_SIZE", "-4").is_err());
        assert!(parse_positive::<u16>("PORT", "http").is_err());
    }
}
