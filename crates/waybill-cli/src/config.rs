use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::{config_dir, data_dir};
use waybill_core::settings::{ConfigError, Settings, DB_PATH, ENCRYPTION_KEY};

/// Resolve the config path: explicit override, else `~/.config/waybill/config.toml`
/// (platform-specific).
pub fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => default_path(),
    }
}

pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("waybill").join("config.toml"))
}

/// Default database location written into new configs.
pub fn default_db_path() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("waybill").join("waybill.db"))
}

/// Load settings from a flat TOML table, or JSON object when the file ends in `.json`.
/// A missing file is fatal; there are no built-in defaults for required keys.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let shown = path.display().to_string();
    if !path.exists() {
        return Err(ConfigError::FileMissing { path: shown });
    }
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Parse {
        path: shown.clone(),
        reason: e.to_string(),
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let values = if is_json {
        parse_json(&contents)
    } else {
        parse_toml(&contents)
    }
    .map_err(|reason| ConfigError::Parse {
        path: shown,
        reason,
    })?;
    Ok(Settings::new(values))
}

fn parse_toml(contents: &str) -> Result<BTreeMap<String, String>, String> {
    let table: BTreeMap<String, toml::Value> = toml::from_str(contents).map_err(|e| e.to_string())?;
    table
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(n) => n.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => return Err(format!("{key}: expected a scalar, got {}", other.type_str())),
            };
            Ok((key, value))
        })
        .collect()
}

fn parse_json(contents: &str) -> Result<BTreeMap<String, String>, String> {
    let object: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(contents).map_err(|e| e.to_string())?;
    object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => return Err(format!("{key}: expected a scalar value")),
            };
            Ok((key, value))
        })
        .collect()
}

/// Write a starter config at `path` unless one already exists (never clobbers
/// user edits). Returns the path either way. The file holds the record key, so
/// on unix it is created owner-only (0600).
pub fn write_template_if_missing(path: &Path, db_path: &Path, encoded_key: &str) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut table = BTreeMap::new();
    table.insert(DB_PATH, db_path.display().to_string());
    table.insert(ENCRYPTION_KEY, encoded_key.to_string());
    let body = toml::to_string_pretty(&table)?;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(body.as_bytes())?;
    Ok(path.to_path_buf())
}
