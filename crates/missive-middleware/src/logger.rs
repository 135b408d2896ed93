//! Dispatch lifecycle logging.
//!
//! Emits a `processing` record before the rest of the chain runs, then either
//! `processed` or `error`, and appends a `timings` stamp with the elapsed
//! nanoseconds on both paths. Records go to a [`LoggerAdapter`]; the default
//! one writes through `tracing`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use missive_core::{
    DispatchResult, Envelope, Intent, Middleware, Next, Stamp, TimingsBody, stamps,
};
use serde::Serialize;
use tracing::{error, info};

// =============================================================================
// Records
// =============================================================================

/// Lifecycle step of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStep {
    Processing,
    Processed,
    Error,
}

/// Snapshot of an envelope handed to a [`LoggerAdapter`].
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// Id from the identity stamp.
    pub identity: Option<String>,
    pub message: Intent,
    /// `handled` stamps.
    pub results: Vec<Stamp>,
    /// Every other stamp except the identity.
    pub stamps: Vec<Stamp>,
}

impl LogRecord {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let (results, others): (Vec<Stamp>, Vec<Stamp>) = envelope
            .stamps()
            .into_iter()
            .filter(|s| !s.is(stamps::IDENTITY))
            .partition(|s| s.is(stamps::HANDLED));
        Self {
            identity: envelope.identity(),
            message: envelope.message().clone(),
            results,
            stamps: others,
        }
    }

    /// Elapsed time from the `timings` stamp, in milliseconds.
    pub fn elapsed_ms(&self) -> Option<f64> {
        self.stamps
            .iter()
            .find(|s| s.is(stamps::TIMINGS))
            .and_then(|s| s.body_as::<TimingsBody>())
            .map(|t| t.total as f64 / 1_000_000.0)
    }

    fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct Body<'a> {
            message: &'a Intent,
            results: &'a [Stamp],
            stamps: &'a [Stamp],
        }
        serde_json::to_string(&Body {
            message: &self.message,
            results: &self.results,
            stamps: &self.stamps,
        })
        .unwrap_or_default()
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Receives lifecycle records.
#[async_trait]
pub trait LoggerAdapter: Send + Sync + 'static {
    async fn processing(&self, record: &LogRecord);
    async fn processed(&self, record: &LogRecord);
    async fn error(&self, record: &LogRecord);
}

/// Logs records through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLoggerAdapter;

#[async_trait]
impl LoggerAdapter for TracingLoggerAdapter {
    async fn processing(&self, record: &LogRecord) {
        info!(
            id = record.identity.as_deref().unwrap_or("-"),
            message_type = %record.message.message_type(),
            envelope = %record.to_json(),
            "Processing"
        );
    }

    async fn processed(&self, record: &LogRecord) {
        info!(
            id = record.identity.as_deref().unwrap_or("-"),
            message_type = %record.message.message_type(),
            elapsed_ms = record.elapsed_ms().unwrap_or_default(),
            envelope = %record.to_json(),
            "Processed"
        );
    }

    async fn error(&self, record: &LogRecord) {
        error!(
            id = record.identity.as_deref().unwrap_or("-"),
            message_type = %record.message.message_type(),
            elapsed_ms = record.elapsed_ms().unwrap_or_default(),
            envelope = %record.to_json(),
            "Errored"
        );
    }
}

async fn emit(adapter: &dyn LoggerAdapter, step: LogStep, record: &LogRecord) {
    match step {
        LogStep::Processing => adapter.processing(record).await,
        LogStep::Processed => adapter.processed(record).await,
        LogStep::Error => adapter.error(record).await,
    }
}

// =============================================================================
// Middleware
// =============================================================================

/// How records are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoggerMode {
    /// Buffer records and emit them together after the chain returns.
    pub collect: bool,
    /// Spawn emission instead of awaiting it.
    pub detached: bool,
}

/// Logs every dispatch passing through it.
pub struct Logger {
    adapter: Arc<dyn LoggerAdapter>,
    mode: LoggerMode,
    intents: HashMap<String, LoggerMode>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(TracingLoggerAdapter))
    }
}

impl Logger {
    pub fn new(adapter: Arc<dyn LoggerAdapter>) -> Self {
        Self {
            adapter,
            mode: LoggerMode::default(),
            intents: HashMap::new(),
        }
    }

    pub fn mode(mut self, mode: LoggerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Uses another mode for one message type.
    pub fn with_intent(mut self, message_type: impl Into<String>, mode: LoggerMode) -> Self {
        self.intents.insert(message_type.into(), mode);
        self
    }

    async fn log(&self, detached: bool, records: Vec<(LogStep, LogRecord)>) {
        if detached {
            let adapter = Arc::clone(&self.adapter);
            tokio::spawn(async move {
                for (step, record) in &records {
                    emit(adapter.as_ref(), *step, record).await;
                }
            });
            return;
        }
        for (step, record) in &records {
            emit(self.adapter.as_ref(), *step, record).await;
        }
    }
}

#[async_trait]
impl Middleware for Logger {
    async fn handle(&self, envelope: Arc<Envelope>, next: Next<'_>) -> DispatchResult<()> {
        let mode = self
            .intents
            .get(envelope.message_type())
            .copied()
            .unwrap_or(self.mode);
        let started = Instant::now();
        let mut buffered = Vec::new();

        let processing = (LogStep::Processing, LogRecord::from_envelope(&envelope));
        if mode.collect {
            buffered.push(processing);
        } else {
            self.log(mode.detached, vec![processing]).await;
        }

        let outcome = next.run(Arc::clone(&envelope)).await;
        let total = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        envelope.add_stamp_with(stamps::TIMINGS, &TimingsBody { total });

        let step = if outcome.is_ok() {
            LogStep::Processed
        } else {
            LogStep::Error
        };
        buffered.push((step, LogRecord::from_envelope(&envelope)));
        self.log(mode.detached, buffered).await;

        outcome
    }
}
