//! Structured logging for the bridge.
//!
//! Provides a layered `tracing` subscriber with:
//! - **stderr** output filtered by `RUST_LOG` (default `warn`).
//! - **file appender** writing JSON lines to
//!   `~/.insights-bridge/logs/insights-bridge.YYYY-MM-DD` with daily rotation
//!   and bounded retention.
//! - **Redaction** helpers for sensitive field names and for page URLs, whose
//!   query strings and fragments routinely carry tokens.
//! - **Correlation spans** for tab ids, window message ids and browser
//!   commands.
//! - **Test capture** for asserting on emitted events.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};
use url::Url;

const LOG_DIR_RELATIVE: &str = ".insights-bridge/logs";
const LOG_FILE_PREFIX: &str = "insights-bridge";

/// Daily log files kept by [`prune_old_logs`].
const MAX_LOG_FILES: usize = 7;

const REDACTED: &str = "[REDACTED]";

const REDACTED_FIELD_NAMES: &[&str] = &[
    "token",
    "secret",
    "password",
    "authorization",
    "credential",
    "cookie",
    "session",
];

/// Installs the global subscriber (stderr + JSON file layers).
///
/// Returns `false` when a global subscriber was already installed; the
/// existing one is left in place.
pub fn init_logging() -> bool {
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(make_file_layer())
        .try_init()
        .is_ok()
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(LOG_DIR_RELATIVE))
}

fn make_file_layer<S>() -> Option<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let dir = log_dir()?;
    std::fs::create_dir_all(&dir).ok()?;

    let file_appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // The writer thread must outlive every event; the guard is never dropped.
    std::mem::forget(guard);

    let layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    Some(layer.boxed())
}

/// Removes all but the newest [`MAX_LOG_FILES`] log files. Best effort.
pub fn prune_old_logs() {
    if let Some(dir) = log_dir() {
        prune_logs_in(&dir, MAX_LOG_FILES);
    }
}

/// Returns the number of files removed from `dir`.
fn prune_logs_in(dir: &Path, keep: usize) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut log_files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .collect();

    // Daily suffixes sort chronologically.
    log_files.sort();

    let excess = log_files.len().saturating_sub(keep);
    log_files[..excess]
        .iter()
        .filter(|path| std::fs::remove_file(path).is_ok())
        .count()
}

pub fn is_sensitive_field(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    REDACTED_FIELD_NAMES.iter().any(|&pattern| lower.contains(pattern))
}

pub fn redact_if_sensitive<'a>(field_name: &str, value: &'a str) -> Cow<'a, str> {
    if is_sensitive_field(field_name) {
        Cow::Borrowed(REDACTED)
    } else {
        Cow::Borrowed(value)
    }
}

/// Renders a page URL for logs: scheme, host and path only. Credentials,
/// query and fragment are dropped. Unparseable input is fully redacted.
pub fn redact_url(raw: &str) -> Cow<'static, str> {
    let Ok(mut url) = Url::parse(raw) else {
        return Cow::Borrowed(REDACTED);
    };
    url.set_query(None);
    url.set_fragment(None);
    // Fails only for cannot-be-a-base URLs, which carry no credentials.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Cow::Owned(url.into())
}

pub fn tab_span(tab_id: u32) -> Span {
    tracing::info_span!("insights_tab", tab_id)
}

pub fn message_span(message_id: &str, command: &str) -> Span {
    tracing::debug_span!("insights_message", message_id, command)
}

pub fn command_span(command_id: &str) -> Span {
    tracing::info_span!("insights_command", command_id)
}

/// In-memory event capture for test assertions.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(test)]
impl LogCapture {
    /// Runs `f` with a thread-local subscriber that records every event.
    pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Self) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(CaptureLayer {
            buffer: std::sync::Arc::clone(&capture.buffer),
        });
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, capture)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    pub fn lines(&self) -> Vec<String> {
        self.buffer.lock().expect("capture buffer poisoned").clone()
    }
}

#[cfg(test)]
struct CaptureLayer {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(test)]
impl<S> Layer<S> for CaptureLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = StringVisitor::default();
        event.record(&mut visitor);
        let level = event.metadata().level();
        let line = format!("[{level}] {}", visitor.output);
        self.buffer
            .lock()
            .expect("capture buffer poisoned")
            .push(line);
    }
}

#[cfg(test)]
#[derive(Default)]
struct StringVisitor {
    output: String,
}

#[cfg(test)]
impl tracing::field::Visit for StringVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        use std::fmt::Write as _;
        if !self.output.is_empty() {
            self.output.push(' ');
        }
        let _ = write!(self.output, "{}={value:?}", field.name());
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        use std::fmt::Write as _;
        if !self.output.is_empty() {
            self.output.push(' ');
        }
        let redacted = redact_if_sensitive(field.name(), value);
        let _ = write!(self.output, "{}=\"{redacted}\"", field.name());
    }
}
