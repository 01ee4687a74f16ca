//! Process-wide diagnostic logging.
//!
//! Two sinks: a console layer on stderr whose verbosity is gated by the
//! session's verbose flag (`RUST_LOG` always wins), and a daily-rotating file
//! under the system temp directory that always logs at debug level.

use std::path::PathBuf;
use std::sync::Once;

use tracing::debug;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const LOG_FILE_PREFIX: &str = "persession.log";

static INIT: Once = Once::new();

/// Directory the rotating log files are written to.
#[must_use]
pub fn log_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Installs the global subscriber. Idempotent: only the first call installs,
/// and a subscriber already set by the host application is left in place
/// (`try_init`).
///
/// Console default level: `error`, or `debug` when `verbose` is set.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let default_level = if verbose { "debug" } else { "error" };
        let console_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let file_appender = rolling::daily(log_dir(), LOG_FILE_PREFIX);
        let file_layer = fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(EnvFilter::new("debug"));
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(console_filter);

        let installed = tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer)
            .try_init()
            .is_ok();

        if installed && verbose {
            debug!(
                dir = %log_dir().display(),
                "debug logs can also be found in the rotating log file"
            );
        }
    });
}
