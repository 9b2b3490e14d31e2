use std::env;
use std::time::Duration;

use derive_more::derive::Display;

#[derive(Debug, Display, PartialEq, Eq)]
pub enum ConfigError {
    #[display("Environment variable {_0} must be set")]
    Missing(&'static str),

    #[display("Environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Production,
    Dev,
    // Dev settings with an in-process store instead of PostgreSQL.
    Memory,
}

impl Mode {
    pub fn is_production(&self) -> bool {
        *self == Mode::Production
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub cookie_token: String,
    pub login_token: String,
    pub bind_address: String,
    pub mode: Mode,
    pub payer_interval: Duration,
    pub payer_batch_size: i64,
    pub allowed_origins: Vec<String>,
}

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_PAYER_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_PAYER_BATCH_SIZE: i64 = 100;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads settings through `lookup`, so tests need not touch the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));

        let mode = match lookup("MODE").as_deref() {
            Some("dev") => Mode::Dev,
            Some("memory") => Mode::Memory,
            _ => Mode::Production,
        };

        let database_url = match mode {
            Mode::Memory => lookup("DATABASE_URL"),
            _ => Some(required("DATABASE_URL")?),
        };

        let payer_interval_secs: u64 =
            parse_or(&lookup, "PAYER_INTERVAL_SECS", DEFAULT_PAYER_INTERVAL_SECS)?;
        if payer_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "PAYER_INTERVAL_SECS",
                value: "0".to_owned(),
            });
        }

        let payer_batch_size: i64 =
            parse_or(&lookup, "PAYER_BATCH_SIZE", DEFAULT_PAYER_BATCH_SIZE)?;
        if payer_batch_size <= 0 {
            return Err(ConfigError::Invalid {
                name: "PAYER_BATCH_SIZE",
                value: payer_batch_size.to_string(),
            });
        }

        Ok(Self {
            database_url,
            cookie_token: required("COOKIE_TOKEN")?,
            login_token: required("LOGIN_TOKEN")?,
            bind_address: lookup("BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_owned()),
            mode,
            payer_interval: Duration::from_secs(payer_interval_secs),
            payer_batch_size,
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/quests"),
            ("COOKIE_TOKEN", "cookie"),
            ("LOGIN_TOKEN", "login"),
        ])
        .unwrap();
        assert_eq!(config.mode, Mode::Production);
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.payer_interval, Duration::from_secs(10));
        assert_eq!(config.payer_batch_size, 100);
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn test_memory_mode_needs_no_database() {
        let config = config(&[
            ("MODE", "memory"),
            ("COOKIE_TOKEN", "cookie"),
            ("LOGIN_TOKEN", "login"),
            ("ALLOWED_ORIGINS", "http://localhost:5173, https://quests.example "),
        ])
        .unwrap();
        assert_eq!(config.database_url, None);
        assert!(!config.mode.is_production());
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:5173", "https://quests.example"]
        );
    }

    #[test]
    fn test_missing_and_invalid_values() {
        assert_eq!(
            config(&[("COOKIE_TOKEN", "c"), ("LOGIN_TOKEN", "l")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        assert_eq!(
            config(&[
                ("MODE", "dev"),
                ("DATABASE_URL", "postgres://localhost/quests"),
                ("COOKIE_TOKEN", "c"),
                ("LOGIN_TOKEN", "l"),
                ("PAYER_BATCH_SIZE", "lots"),
            ])
            .unwrap_err(),
            ConfigError::Invalid {
                name: "PAYER_BATCH_SIZE",
                value: "lots".to_owned()
            }
        );
    }

    #[test]
    fn test_payer_settings_must_be_positive() {
        let with = |name, value| {
            config(&[
                ("MODE", "memory"),
                ("COOKIE_TOKEN", "c"),
                ("LOGIN_TOKEN", "l"),
                (name, value),
            ])
        };
        assert_eq!(
            with("PAYER_BATCH_SIZE", "-5").unwrap_err(),
            ConfigError::Invalid {
                name: "PAYER_BATCH_SIZE",
                value: "-5".to_owned()
            }
        );
        assert_eq!(
            with("PAYER_BATCH_SIZE", "0").unwrap_err(),
            ConfigError::Invalid {
                name: "PAYER_BATCH_SIZE",
                value: "0".to_owned()
            }
        );
        assert_eq!(
            with("PAYER_INTERVAL_SECS", "0").unwrap_err(),
            ConfigError::Invalid {
                name: "PAYER_INTERVAL_SECS",
                value: "0".to_owned()
            }
        );
        assert_eq!(with("PAYER_BATCH_SIZE", "1").unwrap().payer_batch_size, 1);
    }
}
