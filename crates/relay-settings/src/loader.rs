//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{RelaySettings, limits};

/// Resolve the default settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides, then validate.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `RELAY_*` overrides read through `lookup`.
///
/// Invalid or out-of-range values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env(lookup);

    if let Some(v) = env.number("RELAY_MAX_CONNECTIONS_PER_TENANT", limits::MAX_PER_TENANT) {
        settings.connections.max_per_tenant = v;
    }
    if let Some(v) = env.number("RELAY_PROBE_INTERVAL_MS", limits::PROBE_INTERVAL_MS) {
        settings.health.probe_interval_ms = v;
    }
    if let Some(v) = env.number("RELAY_TIMEOUT_MULTIPLE", limits::TIMEOUT_MULTIPLE) {
        settings.health.timeout_multiple = v;
    }
    if let Some(v) = env.number(
        "RELAY_MESSAGE_RETENTION_HOURS",
        limits::MESSAGE_RETENTION_HOURS,
    ) {
        settings.retention.message_retention_hours = v;
    }
    if let Some(v) = env.number("RELAY_CONNECTION_SWEEP_BATCH", limits::SWEEP_BATCH) {
        settings.retention.connection_sweep_batch = v;
    }
    if let Some(v) = env.number("RELAY_MESSAGE_SWEEP_BATCH", limits::SWEEP_BATCH) {
        settings.retention.message_sweep_batch = v;
    }
    if let Some(v) = env.number("RELAY_OUTBOUND_BUFFER", limits::OUTBOUND_BUFFER) {
        settings.transport.outbound_buffer = v;
    }
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.number("RELAY_PORT", 0..=u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.boolean("RELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

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

/// Parse a number and check it lies within `min..=max`.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn boolean(&self, name: &str) -> Option<bool> {
        let val = (self.0)(name)?;
        let parsed = parse_bool(&val);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        parsed
    }

    fn number<T>(&self, name: &str, range: RangeInclusive<T>) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd + Copy,
    {
        let val = (self.0)(name)?;
        let parsed = parse_in_range(&val, *range.start(), *range.end());
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    }
}
