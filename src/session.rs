//! The persistent session facade.
//!
//! [`Session`] composes the cache store, the cache policy, and the login
//! evaluator around a pair of `reqwest` clients sharing one cookie jar: the
//! main client follows redirects, the probe client has redirects disabled and
//! is used only by the login check.
//!
//! A session instance is single-owner: it issues one request per call and
//! holds no internal locks beyond the cookie jar's. Sharing one instance
//! across tasks requires external serialization of cache-file access.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{self, CacheType, SaveEvent, StoreError};
use crate::cookies::SessionJar;
use crate::logging;
use crate::login::{LoginResponse, LoginStatus};
use crate::state::{ProxyConfig, SessionState};

/// Default user agent sent with every request unless overridden.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:68.0) Gecko/20100101 Firefox/68.0";

/// Default maximum age of a cache file before it is considered stale.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

const USER_AGENT_HEADER: &str = "user-agent";

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Network or protocol error from the underlying HTTP client,
    /// propagated unchanged; no retry policy is applied here.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A triggered cache write failed. Not swallowed: a failed save means
    /// stale state will be reused on the next run.
    #[error(transparent)]
    CacheWrite(#[from] StoreError),

    /// Allocating a temporary cache file path failed.
    #[error("failed to allocate temporary cache path: {0}")]
    TempPath(#[source] std::io::Error),
}

/// Construction options for [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cache file path. `None` allocates a unique path in the temp directory.
    pub cache_file_path: Option<PathBuf>,
    /// Maximum cache file age before a snapshot is considered stale.
    pub cache_timeout: Duration,
    /// Which events trigger automatic cache writes.
    pub cache_type: CacheType,
    /// Explicit proxy overrides, applied on top of any restored state.
    pub proxies: Option<ProxyConfig>,
    /// Explicit user agent. Always wins over restored state; when `None`, a
    /// restored user agent is kept and [`DEFAULT_USER_AGENT`] applies only to
    /// fresh sessions.
    pub user_agent: Option<String>,
    /// Log debug messages to the console as well as the log file.
    pub verbose_logging: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_file_path: None,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            cache_type: CacheType::AfterEachLogin,
            proxies: None,
            user_agent: None,
            verbose_logging: false,
        }
    }
}

/// Persistent HTTP session with a login helper.
///
/// See the crate docs for usage. Construction restores cached state when the
/// cache file is present, fresh, and valid; requests flow through
/// [`Session::execute`], where the cache policy's per-request triggers run;
/// [`Session::close`] is the deterministic exit point for
/// [`CacheType::AtExit`] sessions.
pub struct Session {
    client: Client,
    probe_client: Client,
    jar: Arc<SessionJar>,
    headers: BTreeMap<String, String>,
    proxies: ProxyConfig,
    cache_file_path: PathBuf,
    cache_timeout: Duration,
    cache_type: CacheType,
    closed: bool,
}

impl Session {
    /// Creates a session, restoring cached state when available.
    ///
    /// A missing, stale, or corrupt cache file is never an error; the session
    /// simply starts fresh. Explicit `proxies`/`user_agent` in `config` win
    /// over anything the restored state carried.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the HTTP clients cannot be built or no
    /// temporary cache path could be allocated.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        logging::init(config.verbose_logging);

        let cache_file_path = match config.cache_file_path {
            Some(path) => path,
            None => temp_cache_path()?,
        };

        let mut cache_timeout = config.cache_timeout;
        let mut cache_type = config.cache_type;
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        let mut proxies = ProxyConfig::default();
        let mut cookies = Vec::new();

        // Adopt a cached snapshot wholesale when one is present, fresh, and
        // valid; the restored instance behaves like the one that saved it.
        match cache::load_if_fresh(&cache_file_path, cache_timeout) {
            Ok(state) => {
                info!(path = %cache_file_path.display(), "cached session restored");
                cookies = state.cookies;
                headers = state.headers;
                proxies = state.proxies;
                cache_timeout = Duration::from_secs(state.cache_timeout_secs);
                cache_type = state.cache_type;
            }
            Err(miss) => {
                info!(path = %cache_file_path.display(), %miss, "starting fresh session");
            }
        }

        // Explicit constructor arguments win over restored state.
        if let Some(overrides) = &config.proxies {
            proxies.apply_overrides(overrides);
        }
        match config.user_agent {
            Some(user_agent) => {
                headers.insert(USER_AGENT_HEADER.to_string(), user_agent);
            }
            None => {
                headers
                    .entry(USER_AGENT_HEADER.to_string())
                    .or_insert_with(|| DEFAULT_USER_AGENT.to_string());
            }
        }

        // A restored snapshot can carry arbitrary strings; a header that
        // cannot become a real header name/value pair would be silently
        // absent from every request, so drop it here rather than re-persist
        // state the session never sends.
        headers.retain(|name, value| {
            let usable = HeaderName::from_bytes(name.as_bytes()).is_ok()
                && HeaderValue::from_str(value).is_ok();
            if !usable {
                warn!(header = %name, "dropping unusable restored header");
            }
            usable
        });

        let jar = Arc::new(SessionJar::from_records(cookies));
        let client = build_client(&headers, &proxies, Arc::clone(&jar), true)?;
        let probe_client = build_client(&headers, &proxies, Arc::clone(&jar), false)?;

        Ok(Self {
            client,
            probe_client,
            jar,
            headers,
            proxies,
            cache_file_path,
            cache_timeout,
            cache_type,
            closed: false,
        })
    }

    /// Creates a session backed by the given cache file with default options.
    ///
    /// # Errors
    ///
    /// See [`Session::new`].
    pub fn with_cache_path(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        Self::new(SessionConfig {
            cache_file_path: Some(path.into()),
            ..SessionConfig::default()
        })
    }

    /// Sends an already-built request, then applies the per-request cache
    /// triggers. This is the choke point every session request goes through.
    ///
    /// # Errors
    ///
    /// Propagates HTTP errors unchanged, and cache write failures when a
    /// triggered save fails.
    pub async fn execute(&self, request: Request) -> Result<Response, SessionError> {
        let method = request.method().clone();
        let response = self.client.execute(request).await?;
        self.after_request(&method)?;
        Ok(response)
    }

    /// Convenience GET routed through [`Session::execute`].
    ///
    /// # Errors
    ///
    /// See [`Session::execute`].
    pub async fn get(&self, url: &str) -> Result<Response, SessionError> {
        let request = self.client.get(url).build()?;
        self.execute(request).await
    }

    /// Convenience form POST routed through [`Session::execute`].
    ///
    /// # Errors
    ///
    /// See [`Session::execute`].
    pub async fn post_form<T>(&self, url: &str, form: &T) -> Result<Response, SessionError>
    where
        T: Serialize + ?Sized,
    {
        let request = self.client.post(url).form(form).build()?;
        self.execute(request).await
    }

    /// Starts an arbitrary request in the session's client.
    ///
    /// Finish with `build()` and hand the request to [`Session::execute`];
    /// sending directly from the builder bypasses the cache triggers.
    #[must_use]
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Logs in by POSTing `data` as a form to `url`, then classifying the
    /// outcome with [`Session::is_logged_in`] against the same URL.
    ///
    /// The login URL doubles as the login-check probe URL: the heuristic
    /// assumes a site that redirects authenticated requests away from its
    /// login page. A successful classification raises the login-succeeded
    /// cache trigger.
    ///
    /// # Errors
    ///
    /// Propagates HTTP errors and triggered cache write failures.
    /// Classification itself never fails: the returned [`LoginResponse`] is
    /// always populated.
    pub async fn login<T>(&self, url: &str, data: &T) -> Result<LoginResponse, SessionError>
    where
        T: Serialize + ?Sized,
    {
        self.login_with(url, data, |builder| builder).await
    }

    /// Like [`Session::login`], but runs `customize` over the prepared form
    /// POST before sending it, for logins that need extra headers, query
    /// parameters, or other request options beyond the form body.
    ///
    /// # Errors
    ///
    /// See [`Session::login`].
    pub async fn login_with<T, F>(
        &self,
        url: &str,
        data: &T,
        customize: F,
    ) -> Result<LoginResponse, SessionError>
    where
        T: Serialize + ?Sized,
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        info!(url, "attempting login");
        let request = customize(self.client.post(url).form(data)).build()?;
        let response = self.execute(request).await?;

        if self.is_logged_in(url).await? {
            if cache::should_trigger_save(self.cache_type, SaveEvent::LoginSucceeded) {
                self.cache_session()?;
            }
            return Ok(LoginResponse::new(LoginStatus::Success, response));
        }
        Ok(LoginResponse::new(LoginStatus::Failure, response))
    }

    /// Returns whether the session looks authenticated, using the redirect
    /// heuristic: a GET to `login_check_url` with redirects disabled that
    /// answers exactly 302 means "logged in".
    ///
    /// This is a heuristic for sites that redirect authenticated requests
    /// away from their login page, not a general authentication check. Other
    /// redirect statuses (301, 303, 307, 308) deliberately do not count. An
    /// empty `login_check_url` returns `false` without issuing a request.
    ///
    /// # Errors
    ///
    /// Propagates HTTP errors from the probe and triggered cache write
    /// failures (the probe counts as a sent GET).
    pub async fn is_logged_in(&self, login_check_url: &str) -> Result<bool, SessionError> {
        debug!(url = login_check_url, "checking login state");
        if login_check_url.is_empty() {
            return Ok(false);
        }

        let response = self.probe_client.get(login_check_url).send().await?;
        self.after_request(&Method::GET)?;

        let logged_in = response.status() == StatusCode::FOUND;
        if logged_in {
            info!("is logged in");
        } else {
            info!(status = %response.status(), "is not logged in");
        }
        Ok(logged_in)
    }

    /// Writes the current session state to the cache file.
    ///
    /// Always writes, even when nothing changed: the file's modification
    /// time is what the freshness check runs on. This is also the only save
    /// path for [`CacheType::Manual`] sessions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    pub fn cache_session(&self) -> Result<(), StoreError> {
        info!(path = %self.cache_file_path.display(), "caching session");
        cache::write_snapshot(&self.cache_file_path, &self.snapshot())
    }

    /// Captures the current session state in serializable form.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        SessionState {
            cookies: self.jar.records(),
            headers: self.headers.clone(),
            proxies: self.proxies.clone(),
            cache_timeout_secs: self.cache_timeout.as_secs(),
            cache_type: self.cache_type,
        }
    }

    /// Returns the cache file's path.
    #[must_use]
    pub fn cache_file_path(&self) -> &Path {
        &self.cache_file_path
    }

    /// Returns the cache trigger policy in effect.
    #[must_use]
    pub fn cache_type(&self) -> CacheType {
        self.cache_type
    }

    /// Returns the cache timeout in effect.
    #[must_use]
    pub fn cache_timeout(&self) -> Duration {
        self.cache_timeout
    }

    /// Returns the effective user agent header, if set.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(USER_AGENT_HEADER).map(String::as_str)
    }

    /// Closes the session, running the exit-time save exactly once and
    /// releasing the underlying HTTP clients.
    ///
    /// This is the primary contract for [`CacheType::AtExit`] sessions: it
    /// is deterministic and surfaces write errors, which the `Drop` fallback
    /// can only log. For other cache types it is a plain resource release.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CacheWrite`] when the exit-time save fails.
    pub fn close(mut self) -> Result<(), SessionError> {
        // Mark first so the Drop fallback never saves a second time.
        self.closed = true;
        self.save_on_exit()?;
        Ok(())
    }

    fn after_request(&self, method: &Method) -> Result<(), StoreError> {
        if cache::should_trigger_save(self.cache_type, SaveEvent::RequestSent(method)) {
            self.cache_session()?;
        }
        Ok(())
    }

    fn save_on_exit(&self) -> Result<(), StoreError> {
        if !cache::should_trigger_save(self.cache_type, SaveEvent::ScopeExit) {
            return Ok(());
        }
        self.cache_session()
    }
}

impl Drop for Session {
    /// Best-effort fallback for sessions dropped without [`Session::close`].
    /// Not guaranteed to run (leaks, aborts), so callers wanting the
    /// exit-time save reliably must call `close`.
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(error) = self.save_on_exit() {
            warn!(%error, "exit-time session cache save failed");
        }
    }
}

fn temp_cache_path() -> Result<PathBuf, SessionError> {
    let file = tempfile::Builder::new()
        .prefix("persession-")
        .suffix(".json")
        .tempfile()
        .map_err(SessionError::TempPath)?;
    let (_file, path) = file.keep().map_err(|error| SessionError::TempPath(error.error))?;
    Ok(path)
}

fn build_client(
    headers: &BTreeMap<String, String>,
    proxies: &ProxyConfig,
    jar: Arc<SessionJar>,
    follow_redirects: bool,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .cookie_provider(jar)
        .default_headers(header_map(headers))
        .gzip(true);

    if !follow_redirects {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }
    if let Some(http) = &proxies.http {
        match reqwest::Proxy::http(http) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(error) => warn!(%error, proxy = %http, "ignoring invalid http proxy"),
        }
    }
    if let Some(https) = &proxies.https {
        match reqwest::Proxy::https(https) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(error) => warn!(%error, proxy = %https, "ignoring invalid https proxy"),
        }
    }

    builder.build()
}

fn header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "skipping invalid default header"),
        }
    }
    map
}
