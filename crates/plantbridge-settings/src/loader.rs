//! Layered loading: compiled defaults, then the JSON file deep-merged on
//! top (nulls skipped, arrays replaced), then `PLANTBRIDGE_*` variables,
//! then validation.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::PlantSettings;

/// `~/.plantbridge`, or `/tmp/.plantbridge` when `HOME` is unset.
pub fn plantbridge_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".plantbridge")
}

pub fn settings_path() -> PathBuf {
    plantbridge_dir().join("settings.json")
}

pub fn load_settings() -> Result<PlantSettings> {
    load_settings_from_path(&settings_path())
}

/// A missing file yields defaults; unreadable or malformed JSON and failed
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<PlantSettings> {
    let mut settings = merge_file_over_defaults(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn merge_file_over_defaults(path: &Path) -> Result<PlantSettings> {
    let mut merged = serde_json::to_value(PlantSettings::default())?;
    if path.exists() {
        debug!(path = %path.display(), "merging settings file");
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(&mut merged, serde_json::from_str(&text)?);
    } else {
        debug!(path = %path.display(), "no settings file, using defaults");
    }
    Ok(serde_json::from_value(merged)?)
}

/// Merge `overlay` into `base`: objects recurse key by key, nulls leave the
/// base untouched, anything else replaces it.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                if value.is_null() {
                    continue;
                }
                match base.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

type Apply = fn(&mut PlantSettings, &str) -> std::result::Result<(), String>;

/// Variable name and how to apply it. Values that fail to parse are
/// logged and ignored.
const ENV_OVERRIDES: &[(&str, Apply)] = &[
    ("PLANTBRIDGE_HOST", |s, v| {
        s.server.host = v.to_string();
        Ok(())
    }),
    ("PLANTBRIDGE_PORT", |s, v| {
        s.server.port = parse_in_range(v, 0, u16::MAX)?;
        Ok(())
    }),
    ("PLANTBRIDGE_TICK_MS", |s, v| {
        s.model.tick_interval_ms = parse_in_range(v, 1, 60_000)?;
        Ok(())
    }),
    ("PLANTBRIDGE_IDLE_TIMEOUT_SECS", |s, v| {
        s.session.idle_timeout_secs = parse_in_range(v, 1, 86_400)?;
        Ok(())
    }),
    ("PLANTBRIDGE_TRUST_STORE", |s, v| {
        s.security.trust_store_path = PathBuf::from(v);
        Ok(())
    }),
    ("PLANTBRIDGE_REQUIRED_POLICY", |s, v| {
        s.security.required_policy = v.parse()?;
        Ok(())
    }),
    ("PLANTBRIDGE_LOG_LEVEL", |s, v| {
        s.telemetry.log_level = v.to_string();
        Ok(())
    }),
];

/// Apply `PLANTBRIDGE_*` variables from the process environment.
pub fn apply_env_overrides(settings: &mut PlantSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

fn apply_overrides_from(settings: &mut PlantSettings, lookup: impl Fn(&str) -> Option<String>) {
    for (name, apply) in ENV_OVERRIDES {
        let Some(value) = lookup(name).filter(|v| !v.is_empty()) else {
            continue;
        };
        if let Err(reason) = apply(settings, &value) {
            warn!(key = *name, value = %value, reason = %reason, "ignoring invalid env override");
        }
    }
}

/// Parse `val` and require `min <= n <= max`.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> std::result::Result<T, String>
where
    T: FromStr + PartialOrd + std::fmt::Display,
{
    let n: T = val.trim().parse().map_err(|_| format!("not a number: {val}"))?;
    if n < min || n > max {
        return Err(format!("{n} outside {min}..={max}"));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use plantbridge_core::SecurityPolicy;
    use serde_json::json;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let mut base = json!({"server": {"port": 8090, "host": "127.0.0.1"}});
        deep_merge(&mut base, json!({"server": {"port": 9000}}));
        assert_eq!(base["server"]["port"], 9000);
        assert_eq!(base["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_skips_nulls_and_replaces_arrays() {
        let mut base = json!({"a": 1, "b": [1, 2, 3]});
        deep_merge(&mut base, json!({"a": null, "b": [9], "c": true}));
        assert_eq!(base, json!({"a": 1, "b": [9], "c": true}));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = merge_file_over_defaults(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.server.port, 8090);
        assert_eq!(s.model.history_capacity, 600);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"model": {"simulation": {"ambientC": 15.0}}, "session": {"idleTimeoutSecs": 30}}"#,
        )
        .unwrap();
        let s = merge_file_over_defaults(&path).unwrap();
        assert!((s.model.simulation.ambient_c - 15.0).abs() < f64::EPSILON);
        assert!((s.model.simulation.time_constant_s - 30.0).abs() < f64::EPSILON);
        assert_eq!(s.session.idle_timeout_secs, 30);
        assert_eq!(s.session.sweep_interval_secs, 5);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = merge_file_over_defaults(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn directory_in_place_of_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = merge_file_over_defaults(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"model": {"tickIntervalMs": 0}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut s = PlantSettings::default();
        apply_overrides_from(
            &mut s,
            env(&[
                ("PLANTBRIDGE_PORT", "9100"),
                ("PLANTBRIDGE_TICK_MS", "250"),
                ("PLANTBRIDGE_REQUIRED_POLICY", "sign_and_encrypt"),
                ("PLANTBRIDGE_TRUST_STORE", "/srv/trust.json"),
            ]),
        );
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.model.tick_interval_ms, 250);
        assert_eq!(s.security.required_policy, SecurityPolicy::SignAndEncrypt);
        assert_eq!(s.security.trust_store_path, PathBuf::from("/srv/trust.json"));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = PlantSettings::default();
        apply_overrides_from(
            &mut s,
            env(&[
                ("PLANTBRIDGE_PORT", "70000"),
                ("PLANTBRIDGE_TICK_MS", "0"),
                ("PLANTBRIDGE_REQUIRED_POLICY", "paranoid"),
                ("PLANTBRIDGE_HOST", ""),
            ]),
        );
        let defaults = PlantSettings::default();
        assert_eq!(s.server.port, defaults.server.port);
        assert_eq!(s.model.tick_interval_ms, defaults.model.tick_interval_ms);
        assert_eq!(s.security.required_policy, defaults.security.required_policy);
        assert_eq!(s.server.host, defaults.server.host);
    }

    #[test]
    fn range_parsing() {
        assert_eq!(parse_in_range::<u16>("8090", 0, u16::MAX), Ok(8090));
        assert!(parse_in_range::<u16>("70000", 0, u16::MAX).is_err());
        assert!(parse_in_range::<u64>("0", 1, 60_000).is_err());
        assert_eq!(parse_in_range::<u64>(" 250 ", 1, 60_000), Ok(250));
        assert!(parse_in_range::<u64>("abc", 1, 10).is_err());
    }

    #[test]
    fn settings_path_under_plantbridge_dir() {
        assert!(settings_path().ends_with(".plantbridge/settings.json"));
    }
}
