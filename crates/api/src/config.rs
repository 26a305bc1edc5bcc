//! Process configuration read from the environment.

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_LEDGER_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Attempts per ledger-mutating call before a conflict is surfaced.
    pub ledger_max_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            use_persistent_stores: false,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            ledger_max_retries: DEFAULT_LEDGER_MAX_RETRIES,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let use_persistent_stores = match lookup("USE_PERSISTENT_STORES") {
            Some(raw) => parse_bool("USE_PERSISTENT_STORES", &raw)?,
            None => defaults.use_persistent_stores,
        };
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            use_persistent_stores,
            database_url,
            db_max_connections: parse_u32(
                "DB_MAX_CONNECTIONS",
                lookup("DB_MAX_CONNECTIONS"),
                defaults.db_max_connections,
            )?,
            ledger_max_retries: parse_u32(
                "LEDGER_MAX_RETRIES",
                lookup("LEDGER_MAX_RETRIES"),
                defaults.ledger_max_retries,
            )?,
        })
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}

fn parse_u32(key: &'static str, raw: Option<String>, default: u32) -> Result<u32, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(settings(&[]).unwrap(), Settings::default());
    }

    #[test]
    fn persistent_mode_requires_database_url() {
        assert_eq!(
            settings(&[("USE_PERSISTENT_STORES", "true")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
        let ok = settings(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("LEDGER_MAX_RETRIES", "5"),
        ])
        .unwrap();
        assert!(ok.use_persistent_stores);
        assert_eq!(ok.ledger_max_retries, 5);
    }

    #[test]
    fn rejects_non_numeric_limits() {
        assert!(matches!(
            settings(&[("DB_MAX_CONNECTIONS", "lots")]),
            Err(ConfigError::Invalid { key: "DB_MAX_CONNECTIONS", .. })
        ));
        assert!(settings(&[("LEDGER_MAX_RETRIES", "0")]).is_err());
    }
}
