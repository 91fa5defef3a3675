//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MarqueeSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `MARQUEE_*` environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use marquee_core::normalize_path;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::MarqueeSettings;

/// Resolve the default settings file path (`~/.marquee/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".marquee").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MarqueeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<MarqueeSettings> {
    let defaults = serde_json::to_value(MarqueeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MarqueeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut MarqueeSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary key lookup.
///
/// Invalid values are ignored with a warning and the file/default value stays.
pub fn apply_overrides(settings: &mut MarqueeSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = read("MARQUEE_HOST") {
        settings.gateway.host = v;
    }
    if let Some(v) = read("MARQUEE_PORT") {
        match parse_u16_range(&v, 1, 65535) {
            Some(port) => settings.endpoints.port = port,
            None => warn_invalid("MARQUEE_PORT", &v),
        }
    }
    if let Some(v) = read("MARQUEE_HEARTBEAT_INTERVAL_SECS") {
        match parse_u64_range(&v, 1, 3600) {
            Some(secs) => settings.gateway.heartbeat_interval_secs = secs,
            None => warn_invalid("MARQUEE_HEARTBEAT_INTERVAL_SECS", &v),
        }
    }
    if let Some(v) = read("MARQUEE_SHUTDOWN_TIMEOUT_SECS") {
        match parse_u64_range(&v, 1, 600) {
            Some(secs) => settings.gateway.shutdown_timeout_secs = secs,
            None => warn_invalid("MARQUEE_SHUTDOWN_TIMEOUT_SECS", &v),
        }
    }
    if let Some(v) = read("MARQUEE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("MARQUEE_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => warn_invalid("MARQUEE_LOG_JSON", &v),
        }
    }
}

/// Reject settings the gateway cannot run with.
pub fn validate(settings: &MarqueeSettings) -> Result<()> {
    let gateway = &settings.gateway;
    if gateway.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "gateway.sendQueueCapacity must be at least 1".into(),
        ));
    }
    if gateway.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "gateway.heartbeatIntervalSecs must be at least 1".into(),
        ));
    }
    if gateway.heartbeat_timeout_secs < gateway.heartbeat_interval_secs {
        return Err(SettingsError::InvalidValue(format!(
            "gateway.heartbeatTimeoutSecs ({}) is shorter than the heartbeat interval ({})",
            gateway.heartbeat_timeout_secs, gateway.heartbeat_interval_secs
        )));
    }
    let endpoints = &settings.endpoints;
    let monitor_path = normalize_path(&endpoints.monitor_path);
    if monitor_path == normalize_path(&endpoints.dashboard_path) {
        return Err(SettingsError::InvalidValue(format!(
            "monitor and dashboard endpoints share the path {monitor_path:?}"
        )));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn warn_invalid(key: &str, value: &str) {
    tracing::warn!(key, value, "invalid env var, ignoring");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn deep_merge_objects_recursively() {
        let target = json!({"a": {"x": 1, "y": 2}, "b": 3});
        let source = json!({"a": {"y": 20}});
        let merged = deep_merge(target, source);
        assert_eq!(merged, json!({"a": {"x": 1, "y": 20}, "b": 3}));
    }

    #[test]
    fn deep_merge_skips_null() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged["a"], json!([3]));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.endpoints.port, MarqueeSettings::default().endpoints.port);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"endpoints":{"monitorPath":"/devices"},"gateway":{"sendQueueCapacity":8}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.endpoints.monitor_path, "/devices");
        assert_eq!(settings.endpoints.dashboard_path, "/dashboard");
        assert_eq!(settings.gateway.send_queue_capacity, 8);
    }

    #[test]
    fn invalid_json_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"gateway":{"heartbeatIntervalSecs":60,"heartbeatTimeoutSecs":30}}"#,
        )
        .unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn overrides_apply_valid_values() {
        let mut settings = MarqueeSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("MARQUEE_HOST", "127.0.0.1"),
                ("MARQUEE_PORT", "9500"),
                ("MARQUEE_LOG_LEVEL", "debug"),
                ("MARQUEE_LOG_JSON", "yes"),
                ("MARQUEE_HEARTBEAT_INTERVAL_SECS", "15"),
            ]),
        );
        assert_eq!(settings.gateway.host, "127.0.0.1");
        assert_eq!(settings.endpoints.port, 9500);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
        assert_eq!(settings.gateway.heartbeat_interval_secs, 15);
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut settings = MarqueeSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("MARQUEE_PORT", "0"),
                ("MARQUEE_LOG_JSON", "maybe"),
                ("MARQUEE_SHUTDOWN_TIMEOUT_SECS", "never"),
            ]),
        );
        let defaults = MarqueeSettings::default();
        assert_eq!(settings.endpoints.port, defaults.endpoints.port);
        assert_eq!(settings.logging.json, defaults.logging.json);
        assert_eq!(
            settings.gateway.shutdown_timeout_secs,
            defaults.gateway.shutdown_timeout_secs
        );
    }

    #[test]
    fn empty_override_is_ignored() {
        let mut settings = MarqueeSettings::default();
        apply_overrides(&mut settings, lookup(&[("MARQUEE_HOST", "")]));
        assert_eq!(settings.gateway.host, "0.0.0.0");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_u16_range("80", 1, 65535), Some(80));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("abc", 1, 10), None);
    }

    #[test]
    fn duplicate_endpoint_paths_rejected() {
        let mut settings = MarqueeSettings::default();
        settings.endpoints.dashboard_path = "monitor/".into();
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn repeated_slashes_name_the_same_endpoint() {
        let mut settings = MarqueeSettings::default();
        settings.endpoints.monitor_path = "signage//screens".into();
        settings.endpoints.dashboard_path = "/signage/screens/".into();
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("/signage/screens"));

        settings.endpoints.dashboard_path = "/signage/admin".into();
        assert!(validate(&settings).is_ok());
    }
}
