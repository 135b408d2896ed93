//! Tracing subscriber for Missive applications.
//!
//! Dispatches run inside a DEBUG `dispatch` span (`kind`, `message_type`,
//! `id`) emitted by `missive_core`; the middlewares log under
//! `missive_middleware`. [`DispatchTracing`] turns those two targets up or
//! down without touching the application's own level:
//!
//! ```toml
//! [logging]
//! level = "info"
//! dispatch = "spans"
//! ```
//!
//! With `spans`, every dispatch produces an opening and a closing line, the
//! latter with busy/idle timings, and every middleware event inside it is
//! prefixed with the span fields:
//!
//! ```text
//! DEBUG dispatch{kind=query message_type=get-user id=..}: missive_middleware::cacher: Cache hit key=..
//! ```
//!
//! # Manual Initialization
//!
//! ```rust,ignore
//! use missive_runtime::config::DispatchTracing;
//! use missive_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::new()
//!     .dispatch_tracing(DispatchTracing::Events)
//!     .directive("missive_middleware::lock=trace")
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{Subscriber, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{DispatchTracing, LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

/// Target of the `dispatch` span and bus bookkeeping.
pub const CORE_TARGET: &str = "missive_core";
/// Target of middleware events.
pub const MIDDLEWARE_TARGET: &str = "missive_middleware";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Installs the global subscriber described by `config`.
///
/// Does nothing if a subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Filter directives implied by a [`DispatchTracing`] mode.
pub fn dispatch_directives(mode: DispatchTracing) -> Vec<String> {
    let level = match mode {
        DispatchTracing::Inherit => return Vec::new(),
        DispatchTracing::Quiet => "warn",
        DispatchTracing::Events | DispatchTracing::Spans => "debug",
    };
    [CORE_TARGET, MIDDLEWARE_TARGET]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect()
}

fn fmt_span(events: &SpanEventConfig, mode: DispatchTracing) -> FmtSpan {
    let mut span = FmtSpan::NONE;
    if events.new {
        span |= FmtSpan::NEW;
    }
    if events.enter {
        span |= FmtSpan::ENTER;
    }
    if events.exit {
        span |= FmtSpan::EXIT;
    }
    if events.close || mode == DispatchTracing::Spans {
        span |= FmtSpan::CLOSE;
    }
    if mode == DispatchTracing::Spans {
        span |= FmtSpan::NEW;
    }
    span
}

/// Builder for the Missive tracing subscriber.
#[derive(Debug)]
pub struct LoggingBuilder {
    level: tracing::Level,
    dispatch: DispatchTracing,
    directives: Vec<String>,
    span_events: SpanEventConfig,
    format: LogFormat,
    output: LogOutput,
    file_path: Option<PathBuf>,
    ansi: bool,
    thread_ids: bool,
    file_location: bool,
    env_filter: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            level: tracing::Level::INFO,
            dispatch: DispatchTracing::default(),
            directives: Vec::new(),
            span_events: SpanEventConfig::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            ansi: true,
            thread_ids: false,
            file_location: false,
            env_filter: true,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new()
            .with_level(config.level.to_tracing_level())
            .dispatch_tracing(config.dispatch)
            .span_events(config.span_events)
            .format(config.format)
            .output(config.output)
            .with_thread_ids(config.thread_ids)
            .with_file_location(config.file_location)
            .with_ansi(config.output != LogOutput::File);
        builder.file_path.clone_from(&config.file_path);
        for (target, level) in &config.filters {
            builder = builder.directive(&format!("{target}={level}"));
        }
        builder
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    pub fn dispatch_tracing(mut self, mode: DispatchTracing) -> Self {
        self.dispatch = mode;
        self
    }

    /// Adds a filter directive such as `missive_middleware::retryer=trace`.
    /// Directives apply after the dispatch mode.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn span_events(mut self, events: SpanEventConfig) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.thread_ids = enabled;
        self
    }

    pub fn with_file_location(mut self, enabled: bool) -> Self {
        self.file_location = enabled;
        self
    }

    /// Ignores `RUST_LOG`; only the builder's level and directives apply.
    pub fn without_env_filter(mut self) -> Self {
        self.env_filter = false;
        self
    }

    fn filter_directives(&self) -> Vec<String> {
        let mut directives = dispatch_directives(self.dispatch);
        directives.extend(self.directives.iter().cloned());
        directives
    }

    /// `RUST_LOG`, when set and enabled, replaces the base level.
    fn build_filter(&self) -> EnvFilter {
        let base = || EnvFilter::new(self.level.to_string().to_lowercase());
        let mut filter = if self.env_filter {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| base())
        } else {
            base()
        };
        for directive in self.filter_directives() {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }

    fn fmt_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let spans = fmt_span(&self.span_events, self.dispatch);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(self.ansi)
            .with_span_events(spans)
            .with_thread_ids(self.thread_ids)
            .with_file(self.file_location)
            .with_line_number(self.file_location);

        match self.format {
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().with_current_span(true).boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            // Full, and Json without the `json-log` feature.
            _ => layer.boxed(),
        }
    }

    /// Builds the subscriber without installing it, writing to `writer`.
    pub fn build_with_writer<W>(&self, writer: W) -> impl Subscriber + Send + Sync + use<W>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        tracing_subscriber::registry()
            .with(self.fmt_layer(writer))
            .with(self.build_filter())
    }

    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber, failing if one is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        match (self.output, &self.file_path) {
            (LogOutput::Stderr, _) => self.build_with_writer(std::io::stderr).try_init(),
            (LogOutput::File, Some(path)) => {
                let appender = tracing_appender::rolling::never(
                    path.parent().unwrap_or_else(|| Path::new(".")),
                    path.file_name().unwrap_or_else(|| OsStr::new("missive.log")),
                );
                self.build_with_writer(appender).try_init()
            }
            (LogOutput::File, None) => {
                warn!("File output requested but no file path configured, falling back to stdout");
                self.build_with_writer(std::io::stdout).try_init()
            }
            (LogOutput::Stdout, _) => self.build_with_writer(std::io::stdout).try_init(),
        }
    }
}
