//! Session snapshot persistence.
//!
//! Snapshots are schema-versioned JSON blobs holding the full
//! [`SessionState`]. The store reads and writes bytes at a path; deciding
//! *when* to do either is the policy's job.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::state::{STATE_SCHEMA_VERSION, SessionState};

/// Format marker embedded in every snapshot so arbitrary JSON files are
/// rejected as corrupt instead of half-deserializing.
const SNAPSHOT_FORMAT: &str = "persession/session-state";

/// Errors writing a session snapshot.
///
/// Write failures are correctness-relevant (stale state would be reused on
/// the next run) and propagate to the caller; they are never swallowed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem write failed.
    #[error("failed to write session cache to {path}: {source}")]
    Io {
        /// The cache file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing the session state failed.
    #[error("failed to serialize session state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reasons a snapshot could not be loaded.
///
/// All three are non-fatal: the session starts fresh, and the miss is logged
/// at info level. None of them ever propagate out of session construction.
#[derive(Debug, Error)]
pub enum CacheMiss {
    /// No cache file exists at the path.
    #[error("cache file not found")]
    NotFound,

    /// The cache file exists but its age reached the configured timeout.
    #[error("cache expired ({age_secs}s old, timeout {timeout_secs}s)")]
    Expired {
        /// The file's age in seconds.
        age_secs: u64,
        /// The configured timeout in seconds.
        timeout_secs: u64,
    },

    /// The payload failed to deserialize or is not a session snapshot.
    #[error("cache file corrupt: {0}")]
    Corrupt(String),
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format: &'static str,
    schema: u32,
    state: &'a SessionState,
}

#[derive(Deserialize)]
struct Snapshot {
    format: String,
    schema: u32,
    state: SessionState,
}

/// Writes `state` to `path`, creating parent directories as needed.
///
/// The write is unconditional: even a logically unchanged state is written
/// again, because the file's modification time is the freshness signal the
/// load policy runs on. The file is restricted to owner-only permissions on
/// Unix, since cookies are credential-equivalent.
///
/// # Errors
///
/// Returns [`StoreError`] when serialization or the filesystem write fails.
pub fn write_snapshot(path: &Path, state: &SessionState) -> Result<(), StoreError> {
    let snapshot = SnapshotRef {
        format: SNAPSHOT_FORMAT,
        schema: STATE_SCHEMA_VERSION,
        state,
    };
    let payload = serde_json::to_vec_pretty(&snapshot)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }

    fs::write(path, &payload).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    set_owner_only_permissions(path)?;

    debug!(path = %path.display(), bytes = payload.len(), "session snapshot written");
    Ok(())
}

/// Reads and validates the snapshot at `path`.
///
/// # Errors
///
/// Returns [`CacheMiss::NotFound`] when no file exists, and
/// [`CacheMiss::Corrupt`] when the payload does not deserialize, carries the
/// wrong format marker, or has an unsupported schema version. The caller
/// treats both identically: fall through to "no cached state".
pub fn read_snapshot(path: &Path) -> Result<SessionState, CacheMiss> {
    let bytes = fs::read(path).map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            CacheMiss::NotFound
        } else {
            CacheMiss::Corrupt(error.to_string())
        }
    })?;

    let snapshot: Snapshot =
        serde_json::from_slice(&bytes).map_err(|error| CacheMiss::Corrupt(error.to_string()))?;

    if snapshot.format != SNAPSHOT_FORMAT {
        return Err(CacheMiss::Corrupt(format!(
            "unrecognized format marker '{}'",
            snapshot.format
        )));
    }
    if snapshot.schema != STATE_SCHEMA_VERSION {
        return Err(CacheMiss::Corrupt(format!(
            "unsupported schema version {} (expected {})",
            snapshot.schema, STATE_SCHEMA_VERSION
        )));
    }

    Ok(snapshot.state)
}

/// Convenience for session construction: freshness check, then read.
///
/// # Errors
///
/// Returns the [`CacheMiss`] explaining why no state was loaded.
pub(crate) fn load_if_fresh(path: &Path, timeout: Duration) -> Result<SessionState, CacheMiss> {
    match super::cache_file_age(path) {
        None => Err(CacheMiss::NotFound),
        Some(age) if !super::is_fresh(age, timeout) => Err(CacheMiss::Expired {
            age_secs: age.as_secs(),
            timeout_secs: timeout.as_secs(),
        }),
        Some(_) => read_snapshot(path),
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}
