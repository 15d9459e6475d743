use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use ml_events::{EventPublisher, EventRecord};
use ml_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use serde_json::Value;
use tokio::runtime::{Handle, Runtime};

/// Builder configuring telemetry for training runs.
pub struct MlTelemetryBuilder {
    module: String,
    min_level: LogLevel,
    log_path: Option<PathBuf>,
    sink: Option<Arc<dyn LogSink>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl MlTelemetryBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            min_level: LogLevel::Debug,
            log_path: None,
            sink: None,
            event_publisher: None,
        }
    }

    /// Writes records as JSON lines to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sends records to a custom sink instead of a file.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Assigns the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Finalizes the builder. An explicit sink wins over a log path.
    pub fn build(self) -> Result<MlTelemetry> {
        let sink = match (self.sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => {
                Some(Arc::new(JsonLogger::with_min_level(path, self.min_level)?) as Arc<dyn LogSink>)
            }
            (None, None) => None,
        };
        let event = self.event_publisher.map(EventHandle::new).transpose()?;
        Ok(MlTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                min_level: self.min_level,
                sink,
                event,
            }),
        })
    }
}

/// Cloneable telemetry handle shared by the stacking and deep learning units.
#[derive(Clone)]
pub struct MlTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for MlTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MlTelemetry")
            .field("module", &self.inner.module)
            .field("min_level", &self.inner.min_level)
            .finish_non_exhaustive()
    }
}

struct TelemetryInner {
    module: String,
    min_level: LogLevel,
    sink: Option<Arc<dyn LogSink>>,
    event: Option<EventHandle>,
}

struct EventHandle {
    runtime: Runtime,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self {
            runtime: Runtime::new()?,
            publisher,
        })
    }

    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    eprintln!("telemetry event publish failed: {err:?}");
                }
            });
            Ok(())
        } else {
            self.runtime.block_on(self.publisher.publish(record))
        }
    }
}

impl MlTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> MlTelemetryBuilder {
        MlTelemetryBuilder::new(module)
    }

    /// Logs a structured record.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if level < self.inner.min_level {
            return Ok(());
        }
        if let Some(sink) = &self.inner.sink {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            sink.write(&record)?;
        }
        Ok(())
    }

    /// Emits an event through the configured publisher.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(EventRecord::new(&self.inner.module, event_type, payload))?;
        }
        Ok(())
    }
}

/// Logs through optional telemetry; sink failures never interrupt training.
pub(crate) fn log(
    telemetry: Option<&MlTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

/// Emits through optional telemetry, ignoring publish failures.
pub(crate) fn event(telemetry: Option<&MlTelemetry>, event_type: &str, payload: Value) {
    if let Some(tel) = telemetry {
        let _ = tel.event(event_type, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_events::MemoryEventBus;
    use ml_logging::MemoryLogSink;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn telemetry_logs_and_emits() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("ml.log");
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = MlTelemetry::builder("stacking")
            .log_path(&log_path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "stacking_trained", json!({ "folds": 3 }))
            .unwrap();
        telemetry
            .event("ml.stacking.trained", json!({ "base_models": 2 }))
            .unwrap();
        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("stacking_trained"));
        assert_eq!(bus.of_type("ml.stacking.trained").len(), 1);
    }

    #[test]
    fn min_level_filters_sink() {
        let sink = Arc::new(MemoryLogSink::new(16));
        let telemetry = MlTelemetry::builder("deep")
            .sink(sink.clone())
            .min_level(LogLevel::Warn)
            .build()
            .unwrap();
        log(Some(&telemetry), LogLevel::Info, "quiet", json!({}));
        log(Some(&telemetry), LogLevel::Error, "loud", json!({ "code": 1 }));
        let records = sink.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "loud");
        assert_eq!(records[0].module, "deep");
    }
}
