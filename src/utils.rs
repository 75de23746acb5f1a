//! Utility functions for identities, logging and file system operations.
//!
//! This module provides helper functions used throughout the pipeline:
//! - Deterministic UUIDs for rooms, agents and records
//! - String truncation for log previews
//! - File system validation and atomic JSON writes for the file-backed stores

use serde::Serialize;
use std::fs as stdfs;
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};
use uuid::Uuid;

/// Map an arbitrary string to a stable UUID.
///
/// The same input always yields the same id, which is what makes record
/// writes idempotent: a news URL becomes its record id, a room key becomes
/// its room id.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(stable_id("news-room"), stable_id("news-room"));
/// ```
pub fn stable_id(value: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, value.as_bytes())
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary) with
/// an ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a scratch file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let scratch_path = path.join("..__write_check__");
    stdfs::File::create(&scratch_path)?;
    let _ = stdfs::remove_file(&scratch_path);
    info!("Data directory is writable");
    Ok(())
}

/// Serialize `value` as pretty JSON and replace `path` atomically.
///
/// The JSON is written to a sibling temp file first and renamed over the
/// target, so readers never observe a half-written file.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await
}

/// Read and parse a JSON file, returning `None` if it does not exist.
pub async fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
