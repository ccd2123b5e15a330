//! Typed option extraction from request metadata.
//!
//! Metadata values are plain strings. Each recognised key is parsed into its
//! typed slot; a value that fails to parse is skipped with a debug log and
//! never fails the request.

use std::collections::HashMap;
use std::str::FromStr;

use tracing::debug;

use super::backend::GenerationOptions;

pub const MODEL: &str = "model";
pub const TEMPERATURE: &str = "temperature";
pub const TOP_P: &str = "top_p";
pub const TOP_K: &str = "top_k";
pub const MAX_TOKENS: &str = "max_tokens";
pub const DIMENSIONS: &str = "dimensions";
pub const NORMALIZE: &str = "normalize";

/// Parses `metadata[key]` as `T`, returning `None` when the key is absent or
/// the value is malformed.
pub fn parse_option<T: FromStr>(metadata: &HashMap<String, String>, key: &str) -> Option<T> {
    let raw = metadata.get(key)?;
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse() {
        Some(value)
    } else {
        debug!(option = key, value = %raw, "skipping malformed option");
        None
    }
}

/// Boolean option; accepts `true`/`false`/`1`/`0`/`yes`/`no`, case-insensitive.
pub fn parse_bool(metadata: &HashMap<String, String>, key: &str) -> Option<bool> {
    let raw = metadata.get(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => {
            debug!(option = key, value = %raw, "skipping malformed option");
            None
        }
    }
}

/// Non-empty `model` metadata value.
pub fn model(metadata: &HashMap<String, String>) -> Option<String> {
    metadata
        .get(MODEL)
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Builds generation options from metadata.
#[must_use]
pub fn generation_options(metadata: &HashMap<String, String>) -> GenerationOptions {
    GenerationOptions {
        temperature: parse_option::<f32>(metadata, TEMPERATURE).filter(|t| t.is_finite()),
        top_p: parse_option::<f32>(metadata, TOP_P).filter(|p| p.is_finite()),
        top_k: parse_option(metadata, TOP_K),
        max_tokens: parse_option(metadata, MAX_TOKENS),
    }
}
