//! Cookie records and the serializable session jar.
//!
//! `reqwest`'s built-in `Jar` does the request-time domain/path matching but
//! cannot be iterated, so it alone cannot round-trip through a cache file.
//! [`SessionJar`] keeps a serializable shadow record of every cookie the
//! server sets while delegating all matching to an inner `Jar`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

/// A single cookie in snapshot form.
///
/// The value field is redacted in Debug output to prevent accidental logging
/// of sensitive cookie data.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    /// The domain the cookie belongs to, without a leading dot.
    pub domain: String,
    /// Whether the cookie is restricted to the exact host that set it
    /// (no `Domain` attribute was present).
    pub host_only: bool,
    /// The URL path scope for the cookie.
    pub path: String,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
    /// Unix timestamp for expiry (0 = session cookie).
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive — never log).
    value: String,
}

impl CookieRecord {
    /// Creates a new cookie record.
    #[must_use]
    pub fn new(
        domain: String,
        host_only: bool,
        path: String,
        secure: bool,
        expires: u64,
        name: String,
        value: String,
    ) -> Self {
        Self {
            domain,
            host_only,
            path,
            secure,
            expires,
            name,
            value,
        }
    }

    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive — avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn key(&self) -> RecordKey {
        (self.domain.clone(), self.path.clone(), self.name.clone())
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for CookieRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieRecord")
            .field("domain", &self.domain)
            .field("host_only", &self.host_only)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

type RecordKey = (String, String, String);

/// Cookie store shared by the session's HTTP clients.
///
/// Matching is delegated to an inner [`Jar`]; the shadow records are keyed by
/// `(domain, path, name)` so a re-set cookie replaces its record instead of
/// accumulating duplicates.
#[derive(Debug, Default)]
pub struct SessionJar {
    inner: Jar,
    records: RwLock<BTreeMap<RecordKey, CookieRecord>>,
}

impl SessionJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a jar from restored snapshot records.
    ///
    /// Records that expired while the snapshot sat on disk are skipped.
    #[must_use]
    pub fn from_records(records: Vec<CookieRecord>) -> Self {
        let jar = Jar::default();
        let now = unix_now();
        let mut map = BTreeMap::new();

        for record in records {
            if record.expires > 0 && record.expires <= now {
                debug!(domain = %record.domain, name = %record.name, "skipping expired cookie");
                continue;
            }
            let origin = record_origin_url(&record);
            if let Ok(url) = origin.parse::<Url>() {
                jar.add_cookie_str(&set_cookie_string(&record), &url);
                map.insert(record.key(), record);
            } else {
                warn!(
                    domain = %record.domain,
                    name = %record.name,
                    "skipping cookie with unparseable domain"
                );
            }
        }

        Self {
            inner: jar,
            records: RwLock::new(map),
        }
    }

    /// Snapshot of all live cookie records, ordered by domain, path, name.
    #[must_use]
    pub fn records(&self) -> Vec<CookieRecord> {
        self.records
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<HeaderValue> = cookie_headers.cloned().collect();

        if let Ok(mut records) = self.records.write() {
            let now = unix_now();
            for header in &headers {
                let Ok(raw) = header.to_str() else {
                    continue;
                };
                match cookie::Cookie::parse(raw) {
                    Ok(parsed) => record_set_cookie(&mut records, &parsed, url, now),
                    Err(error) => {
                        warn!(%error, "ignoring unparseable Set-Cookie header");
                    }
                }
            }
        }

        self.inner.set_cookies(&mut headers.iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.inner.cookies(url)
    }
}

/// What a parsed Set-Cookie header says about the cookie's lifetime.
enum Expiry {
    Session,
    At(u64),
    /// Max-Age <= 0 or an Expires in the past: a deletion marker.
    Delete,
}

fn record_set_cookie(
    records: &mut BTreeMap<RecordKey, CookieRecord>,
    parsed: &cookie::Cookie<'_>,
    url: &Url,
    now: u64,
) {
    let Some(host) = url.host_str() else {
        return;
    };

    let (domain, host_only) = match parsed.domain() {
        Some(domain) => (
            domain.trim_start_matches('.').to_ascii_lowercase(),
            false,
        ),
        None => (host.to_ascii_lowercase(), true),
    };
    let path = parsed
        .path()
        .map_or_else(|| default_cookie_path(url), str::to_string);

    let record = CookieRecord::new(
        domain,
        host_only,
        path,
        parsed.secure().unwrap_or(false),
        0,
        parsed.name().to_string(),
        parsed.value().to_string(),
    );
    let key = record.key();

    match cookie_expiry(parsed, now) {
        Expiry::Delete => {
            records.remove(&key);
            debug!(domain = %key.0, name = %key.2, "cookie removed by server");
        }
        Expiry::Session => {
            records.insert(key, record);
        }
        Expiry::At(expires) => {
            records.insert(key, CookieRecord { expires, ..record });
        }
    }
}

fn cookie_expiry(parsed: &cookie::Cookie<'_>, now: u64) -> Expiry {
    // Max-Age takes precedence over Expires (RFC 6265 §5.3).
    if let Some(max_age) = parsed.max_age() {
        let seconds = max_age.whole_seconds();
        if seconds <= 0 {
            return Expiry::Delete;
        }
        return Expiry::At(now.saturating_add(seconds.unsigned_abs()));
    }

    match parsed.expires() {
        Some(cookie::Expiration::DateTime(datetime)) => {
            match u64::try_from(datetime.unix_timestamp()) {
                Ok(timestamp) if timestamp > now => Expiry::At(timestamp),
                _ => Expiry::Delete,
            }
        }
        Some(cookie::Expiration::Session) | None => Expiry::Session,
    }
}

/// RFC 6265 §5.1.4 default-path: the request path up to its last slash.
fn default_cookie_path(url: &Url) -> String {
    let path = url.path();
    if !path.starts_with('/') {
        return "/".to_string();
    }
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}

/// Builds a `Set-Cookie` header string to replay a record into a jar.
fn set_cookie_string(record: &CookieRecord) -> String {
    let mut parts = vec![format!("{}={}", record.name, record.value())];

    // Host-only cookies carry no Domain attribute; the origin URL scopes them.
    if !record.host_only {
        parts.push(format!("Domain={}", record.domain));
    }
    parts.push(format!("Path={}", record.path));
    if record.secure {
        parts.push("Secure".to_string());
    }
    if record.expires > 0 {
        if let Some(formatted) = unix_to_http_date(record.expires) {
            parts.push(format!("Expires={formatted}"));
        } else {
            warn!(
                domain = %record.domain,
                name = %record.name,
                expires = record.expires,
                "cookie expiry timestamp overflows SystemTime; treating as session cookie"
            );
        }
    }

    parts.join("; ")
}

/// Builds the origin URL used to replay a record into a jar.
fn record_origin_url(record: &CookieRecord) -> String {
    let scheme = if record.secure { "https" } else { "http" };
    format!("{scheme}://{}{}", record.domain, record.path)
}

/// Converts a Unix timestamp to an HTTP-date string (RFC 7231).
fn unix_to_http_date(timestamp: u64) -> Option<String> {
    use std::time::Duration;

    let time = UNIX_EPOCH.checked_add(Duration::from_secs(timestamp))?;
    Some(httpdate::fmt_http_date(time))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
