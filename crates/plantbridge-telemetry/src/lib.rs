//! Structured logging and in-process metrics.
//!
//! Everything goes to stdout as JSON lines; WARN and above is also kept in
//! a SQLite table for later querying.

mod logging;
mod metrics;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};
pub use metrics::{HistogramSummary, MetricSample, MetricType, MetricsRecorder};

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Base level; `RUST_LOG`, when set, replaces the whole filter.
    pub log_level: Level,
    /// Per-module overrides, e.g. `("plantbridge_gateway", DEBUG)`.
    pub module_levels: Vec<(String, Level)>,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(std::env::temp_dir, PathBuf::from);
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_to_sqlite: true,
            log_db_path: home.join(".plantbridge").join("logs.db"),
        }
    }
}

impl TelemetryConfig {
    /// Parse a level name (`"debug"`, `"WARN"`, ...), falling back to INFO.
    pub fn parse_level(name: &str) -> Level {
        name.parse().unwrap_or(Level::INFO)
    }

    /// `EnvFilter` directives: base level first, then module overrides.
    fn directives(&self) -> String {
        std::iter::once(self.log_level.as_str().to_ascii_lowercase())
            .chain(
                self.module_levels
                    .iter()
                    .map(|(module, level)| format!("{module}={}", level.as_str().to_ascii_lowercase())),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Keeps the log sink and metrics recorder alive for the process lifetime.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
    metrics: Arc<MetricsRecorder>,
    module_levels: RwLock<Vec<(String, Level)>>,
}

impl TelemetryGuard {
    fn new(log_sink: Option<Arc<SqliteLogSink>>, module_levels: Vec<(String, Level)>) -> Self {
        Self {
            log_sink,
            metrics: Arc::new(MetricsRecorder::new()),
            module_levels: RwLock::new(module_levels),
        }
    }

    /// Record a per-module override; the last one for a module wins.
    pub fn set_module_level(&self, module: &str, level: Level) {
        let mut levels = self.module_levels.write();
        match levels.iter_mut().find(|(m, _)| m == module) {
            Some((_, existing)) => *existing = level,
            None => levels.push((module.to_string(), level)),
        }
    }

    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels.read().clone()
    }

    /// Shared recorder handed to every component that emits metrics.
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

/// Install the global subscriber. Call once at startup; later calls keep
/// the first subscriber but still return a working guard.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let stdout = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(filter);

    let sink = config.log_to_sqlite.then(|| open_sink(&config)).flatten();

    let _ = tracing_subscriber::registry()
        .with(stdout)
        .with(sink.clone().map(SqliteLogLayer::new))
        .try_init();

    TelemetryGuard::new(sink, config.module_levels)
}

// The subscriber is not installed yet, so failures go to stderr.
fn open_sink(config: &TelemetryConfig) -> Option<Arc<SqliteLogSink>> {
    if let Some(dir) = config.log_db_path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    match SqliteLogSink::new(&config.log_db_path) {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            eprintln!(
                "plantbridge-telemetry: cannot open {}: {e}",
                config.log_db_path.display()
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_falls_back_to_info() {
        assert_eq!(TelemetryConfig::parse_level("debug"), Level::DEBUG);
        assert_eq!(TelemetryConfig::parse_level("WARN"), Level::WARN);
        assert_eq!(TelemetryConfig::parse_level("loud"), Level::INFO);
    }

    #[test]
    fn guard_tracks_module_levels() {
        let guard = TelemetryGuard::new(None, Vec::new());
        guard.set_module_level("plantbridge_gateway", Level::DEBUG);
        guard.set_module_level("plantbridge_gateway", Level::TRACE);
        assert_eq!(
            guard.module_levels(),
            vec![("plantbridge_gateway".to_string(), Level::TRACE)]
        );
        assert!(guard.logs().is_none());
    }

    #[test]
    fn directives_list_module_overrides_after_base() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("plantbridge_session".into(), Level::DEBUG)],
            log_to_sqlite: false,
            ..Default::default()
        };
        assert_eq!(config.directives(), "warn,plantbridge_session=debug");
    }

    #[test]
    fn sink_opens_under_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = TelemetryConfig {
            log_db_path: dir.path().join("nested").join("logs.db"),
            ..Default::default()
        };
        let sink = open_sink(&config).unwrap();
        assert_eq!(sink.count().unwrap(), 0);
    }
}
