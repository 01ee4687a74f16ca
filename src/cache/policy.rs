//! Cache lifecycle policy.
//!
//! Two decisions live here: whether a cache file on disk is still fresh
//! enough to load, and which session events trigger an automatic save.
//! The file's modification time is the sole freshness signal; the payload
//! carries no timestamp of its own.

use std::path::Path;
use std::time::{Duration, SystemTime};

use reqwest::Method;
use serde::{Deserialize, Serialize};

/// Selects which session events trigger an automatic cache write.
///
/// Exactly one value is active per session instance, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    /// Only an explicit `cache_session` call writes the cache.
    Manual,
    /// Save after every request, regardless of method.
    AfterEachRequest,
    /// Save after every POST request.
    AfterEachPost,
    /// Save after every successful login.
    AfterEachLogin,
    /// Save once when the session is closed. `Session::close` is the
    /// deterministic path; `Drop` is a best-effort fallback.
    AtExit,
}

/// A session event the cache policy can react to.
#[derive(Debug, Clone, Copy)]
pub enum SaveEvent<'a> {
    /// A request was sent through the session with the given method.
    RequestSent(&'a Method),
    /// A login attempt was classified as successful.
    LoginSucceeded,
    /// The session is being closed (explicitly or by the drop fallback).
    ScopeExit,
}

/// Returns whether `event` should trigger a cache write under `cache_type`.
#[must_use]
pub fn should_trigger_save(cache_type: CacheType, event: SaveEvent<'_>) -> bool {
    match (cache_type, event) {
        (CacheType::AfterEachRequest, SaveEvent::RequestSent(_))
        | (CacheType::AfterEachLogin, SaveEvent::LoginSucceeded)
        | (CacheType::AtExit, SaveEvent::ScopeExit) => true,
        (CacheType::AfterEachPost, SaveEvent::RequestSent(method)) => {
            method.as_str().eq_ignore_ascii_case("POST")
        }
        _ => false,
    }
}

/// Returns the cache file's age (now minus mtime), or `None` when the file
/// does not exist or its metadata cannot be read.
///
/// A modification time in the future counts as age zero.
#[must_use]
pub fn cache_file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

/// Freshness check: the age must be *strictly* less than the timeout.
/// An age equal to the timeout is already expired.
#[must_use]
pub fn is_fresh(age: Duration, timeout: Duration) -> bool {
    age < timeout
}

/// Returns whether a snapshot at `path` should be loaded given `timeout`.
#[must_use]
pub fn should_load(path: &Path, timeout: Duration) -> bool {
    cache_file_age(path).is_some_and(|age| is_fresh(age, timeout))
}
