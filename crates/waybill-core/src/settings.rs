use std::{collections::BTreeMap, path::PathBuf, str::FromStr};

use thiserror::Error;

/// Setting holding the SQLite database path.
pub const DB_PATH: &str = "db_path";
/// Setting holding the 32-byte record encryption key (base64 or raw).
pub const ENCRYPTION_KEY: &str = "encryption_key";
/// Optional base URL of an IPFS HTTP API used for publication.
pub const IPFS_API: &str = "ipfs_api";
/// Optional dispatcher worker count.
pub const WORKERS: &str = "workers";
/// Optional dispatcher queue bound.
pub const QUEUE_CAPACITY: &str = "queue_capacity";

/// Errors raised while loading or reading settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Settings file does not exist.
    #[error("configuration file not found: {path}")]
    FileMissing { path: String },
    /// Settings file exists but could not be read or parsed.
    #[error("failed to parse configuration {path}: {reason}")]
    Parse { path: String, reason: String },
    /// A required setting is absent.
    #[error("configuration key not found: {key}")]
    MissingKey { key: String },
    /// A setting is present but its value is unusable.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Immutable name -> value settings, populated once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Look up a required setting. Absence is an error, never a default.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingKey {
                key: key.to_string(),
            })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parse an optional setting, falling back to `default` only when absent.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        self.require(DB_PATH).map(PathBuf::from)
    }

    pub fn encryption_key(&self) -> Result<&str, ConfigError> {
        self.require(ENCRYPTION_KEY)
    }

    pub fn ipfs_api(&self) -> Option<&str> {
        self.get(IPFS_API).filter(|v| !v.trim().is_empty())
    }

    pub fn workers(&self) -> Result<usize, ConfigError> {
        self.positive(WORKERS, 4)
    }

    pub fn queue_capacity(&self) -> Result<usize, ConfigError> {
        self.positive(QUEUE_CAPACITY, 64)
    }

    fn positive(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.parse_or(key, default)?;
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    }
}

impl FromIterator<(String, String)> for Settings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let cfg = settings(&[(DB_PATH, "/tmp/waybill.db")]);
        let err = cfg.encryption_key().expect_err("key should be missing");
        assert_eq!(
            err,
            ConfigError::MissingKey {
                key: ENCRYPTION_KEY.into()
            }
        );
        assert_eq!(
            cfg.db_path().expect("db path"),
            PathBuf::from("/tmp/waybill.db")
        );
    }

    #[test]
    fn optional_numbers_default_only_when_absent() {
        let cfg = settings(&[]);
        assert_eq!(cfg.workers().expect("workers"), 4);
        assert_eq!(cfg.queue_capacity().expect("capacity"), 64);

        let cfg = settings(&[(WORKERS, "8"), (QUEUE_CAPACITY, " 2 ")]);
        assert_eq!(cfg.workers().expect("workers"), 8);
        assert_eq!(cfg.queue_capacity().expect("capacity"), 2);
    }

    #[test]
    fn rejects_unusable_numbers() {
        let cfg = settings(&[(WORKERS, "many")]);
        assert!(matches!(
            cfg.workers(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let cfg = settings(&[(QUEUE_CAPACITY, "0")]);
        assert!(matches!(
            cfg.queue_capacity(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn blank_ipfs_api_is_treated_as_unset() {
        assert_eq!(settings(&[(IPFS_API, "  ")]).ipfs_api(), None);
        assert_eq!(
            settings(&[(IPFS_API, "http://127.0.0.1:5001")]).ipfs_api(),
            Some("http://127.0.0.1:5001")
        );
    }
}
