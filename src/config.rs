//! Environment configuration accessors.
//!
//! Everything reads the process environment at call time. Optional accessors
//! fall back to their default when the variable is unset, empty, or does not
//! parse; only [`required`] and [`hex_bytes`] can fail.

use std::env;

use tracing::Level;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(String),
}

/// Loads `.env` from the working directory if there is one. Variables that
/// are already set keep their value.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "failed to load .env file");
        }
    }
}

fn lookup(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn required(key: &str) -> Result<String, ConfigError> {
    lookup(key).ok_or_else(|| ConfigError::Missing(key.to_owned()))
}

pub fn string_or(key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}

pub fn int_or(key: &str, default: i64) -> i64 {
    lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub fn bool_or(key: &str, default: bool) -> bool {
    lookup(key).and_then(|v| parse_bool(&v)).unwrap_or(default)
}

pub fn level_or(key: &str, default: Level) -> Level {
    lookup(key).and_then(|v| parse_level(&v)).unwrap_or(default)
}

/// Hex-decoded bytes when the value is valid even-length hex, otherwise the
/// raw bytes of the value. Used for symmetric keys that may be configured
/// either way.
pub fn hex_bytes(key: &str) -> Result<Vec<u8>, ConfigError> {
    Ok(decode_hex_or_raw(&required(key)?))
}

// ── Parsers ──────────────────────────────────────────────────────────────────

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Level names, or the integer scale used by `log/slog`-style configs
/// (-4 debug, 0 info, 4 warn, 8 error).
fn parse_level(value: &str) -> Option<Level> {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return Some(match n {
            i64::MIN..-4 => Level::TRACE,
            -4..0 => Level::DEBUG,
            0..4 => Level::INFO,
            4..8 => Level::WARN,
            _ => Level::ERROR,
        });
    }
    value.parse().ok()
}

fn decode_hex_or_raw(value: &str) -> Vec<u8> {
    if value.len() % 2 == 0 {
        if let Ok(bytes) = hex::decode(value) {
            return bytes;
        }
    }
    value.as_bytes().to_vec()
}
