//! Persistent HTTP client session with a login helper.
//!
//! This library wraps a cookie/header-bearing HTTP client so that
//! authentication state (cookies, default headers, proxy settings) survives
//! across process restarts, cached in a file. A login helper classifies
//! login success/failure from the site's redirect behavior.
//!
//! # Architecture
//!
//! - [`cache`] - snapshot persistence and the load/save lifecycle policy
//! - [`cookies`] - serializable cookie jar shared by the session's clients
//! - [`login`] - login status classification types
//! - [`session`] - the [`Session`] facade external callers interact with
//!
//! # Basic usage
//!
//! ```no_run
//! use persession::{Session, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig {
//!     cache_file_path: Some("cache.json".into()),
//!     ..SessionConfig::default()
//! };
//! let session = Session::new(config)?;
//!
//! if !session.is_logged_in("https://example.com/login").await? {
//!     let data = [("user", "user"), ("password", "pass")];
//!     let res = session.login("https://example.com/login", &data).await?;
//!     println!("{}", res.login_status());
//! }
//! let data = session.get("https://example.com/data").await?;
//! println!("{}", data.status());
//! session.close()?;
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod cookies;
pub mod logging;
pub mod login;
pub mod session;
pub mod state;

// Re-export commonly used types
pub use cache::{CacheMiss, CacheType, SaveEvent, StoreError};
pub use cookies::{CookieRecord, SessionJar};
pub use login::{LoginResponse, LoginStatus};
pub use session::{
    DEFAULT_CACHE_TIMEOUT, DEFAULT_USER_AGENT, Session, SessionConfig, SessionError,
};
pub use state::{ProxyConfig, SessionState};
