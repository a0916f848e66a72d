use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};

/// Builder for analysis telemetry sinks.
pub struct AnalysisTelemetryBuilder {
    module: String,
    run_id: Option<String>,
    log_path: Option<PathBuf>,
    sinks: Vec<Arc<dyn LogSink>>,
    min_level: LogLevel,
}

impl AnalysisTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            run_id: None,
            log_path: None,
            sinks: Vec::new(),
            min_level: LogLevel::Debug,
        }
    }

    /// Tags every record with a run identifier.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Adds another sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<AnalysisTelemetry> {
        let mut sinks = self.sinks;
        if let Some(path) = self.log_path {
            sinks.push(Arc::new(JsonLogger::new(path)?));
        }
        Ok(AnalysisTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                run_id: self.run_id,
                sinks,
                min_level: self.min_level,
            }),
        })
    }
}

/// Telemetry handle passed through the analysis stages.
#[derive(Clone)]
pub struct AnalysisTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for AnalysisTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTelemetry")
            .field("module", &self.inner.module)
            .field("run_id", &self.inner.run_id)
            .field("sinks", &self.inner.sinks.len())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    run_id: Option<String>,
    sinks: Vec<Arc<dyn LogSink>>,
    min_level: LogLevel,
}

impl AnalysisTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> AnalysisTelemetryBuilder {
        AnalysisTelemetryBuilder::new(module)
    }

    /// Run identifier attached to records, if any.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.inner.run_id.as_deref()
    }

    /// Logs structured metadata to every sink.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if level < self.inner.min_level || self.inner.sinks.is_empty() {
            return Ok(());
        }
        let mut record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
        if let Some(run_id) = &self.inner.run_id {
            record = record.with_run_id(run_id.clone());
        }
        for sink in &self.inner.sinks {
            sink.write(&record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_logging::{read_records, MemorySink};
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_file_and_memory_sinks() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("churn.log");
        let memory = Arc::new(MemorySink::new());
        let telemetry = AnalysisTelemetry::builder("churn")
            .run_id("run-7")
            .log_path(&path)
            .sink(memory.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "churn.load.completed", json!({ "rows": 3 }))
            .unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_id.as_deref(), Some("run-7"));
        assert_eq!(records[0].metadata["rows"], 3);
        assert_eq!(memory.messages(), vec!["churn.load.completed"]);
    }

    #[test]
    fn records_below_min_level_are_dropped() {
        let memory = Arc::new(MemorySink::new());
        let telemetry = AnalysisTelemetry::builder("churn")
            .sink(memory.clone())
            .min_level(LogLevel::Info)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Debug, "churn.fit.iteration", json!({}))
            .unwrap();
        telemetry
            .log(LogLevel::Warn, "churn.evaluate.undefined_metric", json!({}))
            .unwrap();
        assert_eq!(memory.messages(), vec!["churn.evaluate.undefined_metric"]);
    }
}
