//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HaggleSettings::default()`]
//! 2. If `~/.haggle/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `HAGGLE_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::HaggleSettings;

/// Directory holding the settings file and the default database.
pub fn haggle_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".haggle")
}

/// Resolve the path to the settings file (`~/.haggle/settings.json`).
pub fn settings_path() -> PathBuf {
    haggle_home().join("settings.json")
}

/// Database path used when `storage.dbPath` is empty.
pub fn default_db_path() -> PathBuf {
    haggle_home().join("haggle.db")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HaggleSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// validation is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HaggleSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<HaggleSettings> {
    let defaults = serde_json::to_value(HaggleSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
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

/// Apply `HAGGLE_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut HaggleSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Integers must parse and fall inside their range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Anything else is logged
/// and ignored, keeping the file/default value.
pub fn apply_overrides_from<F>(settings: &mut HaggleSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HAGGLE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("HAGGLE_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("HAGGLE_QUEUE_CAPACITY", 1, 1_048_576) {
        settings.server.outbound_queue_capacity = v;
    }
    if let Some(v) = env.u64("HAGGLE_KEEPALIVE_SECS", 1, 3600) {
        settings.server.keepalive_interval_secs = v;
    }
    if let Some(v) = env.usize("HAGGLE_MAX_MESSAGE_SIZE", 1024, 16 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }

    // ── Delivery ────────────────────────────────────────────────────
    if let Some(v) = env.u64("HAGGLE_MAX_RETRIES", 0, 16) {
        settings.delivery.max_retries = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = env.u64("HAGGLE_RETRY_BASE_MS", 1, 60_000) {
        settings.delivery.retry_base_delay_ms = v;
    }
    if let Some(v) = env.bool("HAGGLE_SENDER_RECEIPTS") {
        settings.delivery.sender_receipts = v;
    }

    // ── Storage / media ─────────────────────────────────────────────
    if let Some(v) = env.string("HAGGLE_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = env.string("HAGGLE_MEDIA_BASE_URL") {
        settings.media.base_url = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("HAGGLE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("HAGGLE_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject values the server cannot run with.
pub fn validate(settings: &HaggleSettings) -> Result<()> {
    if settings.server.outbound_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.outboundQueueCapacity must be greater than 0".into(),
        ));
    }
    if settings.server.keepalive_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.keepaliveIntervalSecs must be greater than 0".into(),
        ));
    }
    if settings.delivery.retry_base_delay_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "delivery.retryBaseDelayMs must be greater than 0".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean (case-insensitive).
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

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "boolean", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }
}
