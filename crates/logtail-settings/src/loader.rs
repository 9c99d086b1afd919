//! Settings file loading, deep merge and environment overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::LogtailSettings;

/// Default settings file: `~/.logtail/settings.json`.
pub fn settings_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".logtail")
        .join("settings.json")
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// anything else in `overlay` replaces the value in `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Load from the default path with process environment overrides.
pub fn load_settings() -> Result<LogtailSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` (missing file means defaults), then apply `LOGTAIL_*`
/// variables from the process environment and validate.
pub fn load_settings_from_path(path: &Path) -> Result<LogtailSettings> {
    let mut settings = read_file_over_defaults(path)?;
    apply_env_overrides(&mut settings, std::env::vars());
    settings.validate();
    Ok(settings)
}

fn read_file_over_defaults(path: &Path) -> Result<LogtailSettings> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(LogtailSettings::default());
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let user: Value = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let defaults = serde_json::to_value(LogtailSettings::default())
        .map_err(|e| SettingsError::Invalid(e.to_string()))?;
    serde_json::from_value(deep_merge(defaults, user))
        .map_err(|e| SettingsError::Invalid(e.to_string()))
}

fn parse_into<T: FromStr>(key: &str, raw: &str, slot: &mut T) {
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = raw, "ignoring unparsable environment override"),
    }
}

/// Apply `LOGTAIL_*` overrides from `vars`. Unknown keys are ignored and
/// unparsable values are skipped with a warning.
pub fn apply_env_overrides<I, K, V>(settings: &mut LogtailSettings, vars: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    for (key, value) in vars {
        let (key, value) = (key.as_ref(), value.as_ref());
        match key {
            "LOGTAIL_HOST" => settings.server.host = value.to_owned(),
            "LOGTAIL_PORT" => parse_into(key, value, &mut settings.server.port),
            "LOGTAIL_MAX_SEND_QUEUE" => parse_into(key, value, &mut settings.server.max_send_queue),
            "LOGTAIL_POLL_TIMEOUT_MS" => {
                parse_into(key, value, &mut settings.streamer.poll_timeout_ms);
            }
            "LOGTAIL_PACING_INTERVAL_MS" => {
                parse_into(key, value, &mut settings.streamer.pacing_interval_ms);
            }
            "LOGTAIL_BUS_RETENTION" => {
                parse_into(key, value, &mut settings.bus.retention_per_topic);
            }
            "LOGTAIL_BUS_MAX_TOPICS" => parse_into(key, value, &mut settings.bus.max_topics),
            "LOGTAIL_BUS_TOPIC_IDLE_TTL_SECS" => {
                parse_into(key, value, &mut settings.bus.topic_idle_ttl_secs);
            }
            "LOGTAIL_LOG_LEVEL" => settings.logging.level = value.to_owned(),
            "LOGTAIL_LOG_JSON" => parse_into(key, value, &mut settings.logging.json),
            _ => {}
        }
    }
}
