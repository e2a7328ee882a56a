//! Canonical hashing, UTC timestamps, and relative-path normalization.
//!
//! `canonical_json_bytes` deliberately relies on [`serde_json::Map`]'s default
//! `BTreeMap` backing (the `preserve_order` feature is never enabled in this crate)
//! so key-sorting falls out of the type rather than an extra sort pass.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Current UTC time, second precision, `Z` suffix (e.g. `2026-08-01T12:00:00Z`).
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Serialize with sorted keys, minimal separators, trailing newline, UTF-8.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut text = serde_json::to_string(&value)?;
    text.push('\n');
    Ok(text.into_bytes())
}

pub fn sha256_hex<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let bytes = canonical_json_bytes(value)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Hash a raw [`Value`] the same way, used when assembling the hashed substructure
/// by hand (schema_version/project/tasks/indexes) instead of a typed struct.
pub fn sha256_hex_value(value: &Value) -> String {
    let mut text = serde_json::to_string(value).unwrap_or_default();
    text.push('\n');
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Backslashes to forward slashes, strip a leading `./`. Does not reject `..` —
/// callers that need traversal rejection use [`normalize_safe_rel_path`].
pub fn normalize_rel_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    replaced.strip_prefix("./").unwrap_or(&replaced).to_string()
}

/// Like [`normalize_rel_path`] but rejects empty, absolute, or traversal paths.
pub fn normalize_safe_rel_path(path: &str) -> Option<String> {
    let norm = normalize_rel_path(path);
    if norm.is_empty() || norm.starts_with('/') || norm.starts_with("..") {
        return None;
    }
    if PathBuf::from(&norm)
        .components()
        .any(|c| c.as_os_str() == "..")
    {
        return None;
    }
    Some(norm)
}
