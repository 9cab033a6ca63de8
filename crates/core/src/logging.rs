//! Logging setup
//!
//! Compact timestamped output with per-module level configuration.
//! `RUST_LOG` takes precedence over the `[logging]` config table.
//!
//! ```toml
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! bsync_watcher = "debug"
//! ```

use std::io::Write;
use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let mut filter_str = config.default.clone();
    for (module, level) in &config.modules {
        filter_str.push_str(&format!(",{module}={level}"));
    }
    EnvFilter::try_new(&filter_str).unwrap_or_else(|e| {
        eprintln!("invalid log filter '{filter_str}': {e}; falling back to info");
        EnvFilter::new("info")
    })
}

/// Initialize logging to stderr
///
/// Safe to call multiple times; only the first call takes effect.
pub fn init_with_config(config: &LoggingConfig) {
    init_with_writer(config, std::io::stderr, true);
}

/// Initialize logging to an arbitrary writer (e.g. a log file appender)
pub fn init_with_writer<W>(config: &LoggingConfig, writer: W, ansi: bool)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_ansi(ansi)
            .with_writer(writer)
            .with_filter(build_filter(config));

        if tracing_subscriber::registry().with(fmt_layer).try_init().is_err() {
            let _ = writeln!(std::io::stderr(), "logging already initialized");
        }
    });
}

/// Initialize logging with the default configuration
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "ready");
/// log_event!("update", "updated", "{}", dir);
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        $crate::tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        $crate::tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("ipc", "routed", "id={}", id);
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        $crate::tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        $crate::tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
