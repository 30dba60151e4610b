//! Logging setup.
//!
//! A thin builder over `tracing-subscriber` with env-filter directives,
//! optional span events, and an optional daily-rotated file appender.
//! Initialisation is one-shot; repeated calls are ignored.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Which span lifecycle events to log.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanEvents {
    pub new: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        close: false,
    };

    pub const LIFECYCLE: Self = Self {
        new: true,
        close: true,
    };

    fn to_fmt_span(self) -> FmtSpan {
        let mut span = FmtSpan::NONE;
        if self.new {
            span = span | FmtSpan::NEW;
        }
        if self.close {
            span = span | FmtSpan::CLOSE;
        }
        span
    }
}

/// Builder for the process-wide subscriber.
///
/// # Example
///
/// ```rust,ignore
/// use wicker_runtime::logging::LoggingBuilder;
///
/// LoggingBuilder::new()
///     .with_level(tracing::Level::DEBUG)
///     .with_directive("wicker_core=trace")
///     .init();
/// ```
pub struct LoggingBuilder {
    level: Level,
    directives: Vec<String>,
    span_events: SpanEvents,
    file: Option<(PathBuf, String)>,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            level: Level::INFO,
            directives: Vec::new(),
            span_events: SpanEvents::NONE,
            file: None,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Parses a level name; unknown names fall back to `info`.
    pub fn with_level_name(self, name: &str) -> Self {
        let level = match name.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        self.with_level(level)
    }

    /// Adds an env-filter directive (e.g. `"wicker_core=debug"`).
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_span_events(mut self, span_events: SpanEvents) -> Self {
        self.span_events = span_events;
        self
    }

    /// Also writes to a daily-rotated file under `dir`.
    pub fn with_file(mut self, dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        self.file = Some((dir.into(), prefix.into()));
        self
    }

    /// Installs the subscriber; no-op when logging is already initialised.
    pub fn init(self) {
        if LOGGING_INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let mut filter = EnvFilter::builder()
            .with_default_directive(self.level.into())
            .from_env_lossy();
        for directive in &self.directives {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }

        let builder = fmt()
            .with_env_filter(filter)
            .with_span_events(self.span_events.to_fmt_span());

        match self.file {
            Some((dir, prefix)) => {
                let appender = tracing_appender::rolling::daily(dir, prefix);
                builder.with_writer(appender).with_ansi(false).init();
            }
            None => builder.init(),
        }
    }
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// True once a subscriber has been installed.
pub fn is_initialized() -> bool {
    LOGGING_INITIALIZED.load(Ordering::SeqCst)
}
