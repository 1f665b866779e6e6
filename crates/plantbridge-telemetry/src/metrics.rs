use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Observations kept per histogram; older ones fall out of the window.
const HISTOGRAM_WINDOW: usize = 1024;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// One metric's current value, as served at `GET /metrics`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub name: String,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub labels: HashMap<String, String>,
    pub metric_type: MetricType,
    /// Counter total, gauge level, or histogram p50.
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<HistogramSummary>,
    pub timestamp: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// All-time observation count; the rest cover the current window.
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Default)]
struct Counter(AtomicU64);

/// An `f64` stored as its bit pattern.
#[derive(Default)]
struct Gauge(AtomicU64);

impl Gauge {
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn update(&self, f: impl Fn(f64) -> f64) {
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some(f(f64::from_bits(bits)).to_bits())
        });
    }
}

#[derive(Default)]
struct Histogram {
    window: Mutex<VecDeque<f64>>,
    seen: AtomicU64,
}

impl Histogram {
    fn observe(&self, value: f64) {
        let mut window = self.window.lock();
        if window.len() == HISTOGRAM_WINDOW {
            window.pop_front();
        }
        window.push_back(value);
        self.seen.fetch_add(1, Ordering::Relaxed);
    }

    fn summary(&self) -> HistogramSummary {
        let mut sorted: Vec<f64> = self.window.lock().iter().copied().collect();
        if sorted.is_empty() {
            return HistogramSummary::default();
        }
        sorted.sort_by(f64::total_cmp);
        let last = sorted.len() - 1;
        let quantile = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(last)];
        HistogramSummary {
            count: self.seen.load(Ordering::Relaxed),
            sum: sorted.iter().sum(),
            p50: quantile(0.50),
            p95: quantile(0.95),
            p99: quantile(0.99),
        }
    }
}

/// Name plus labels sorted by key, so label order at call sites is irrelevant.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

/// All series of one metric type.
struct Family<T> {
    series: RwLock<HashMap<MetricKey, T>>,
}

impl<T: Default> Family<T> {
    fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Run `f` on the series, creating it on first use. The common case
    /// only takes the read lock.
    fn with(&self, key: MetricKey, f: impl FnOnce(&T)) {
        if let Some(series) = self.series.read().get(&key) {
            f(series);
            return;
        }
        f(self.series.write().entry(key).or_default());
    }

    fn get<R>(&self, key: &MetricKey, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.series.read().get(key).map(f)
    }

    fn samples(
        &self,
        metric_type: MetricType,
        timestamp: &str,
        value: impl Fn(&T) -> (f64, Option<HistogramSummary>),
    ) -> Vec<MetricSample> {
        self.series
            .read()
            .iter()
            .map(|(key, series)| {
                let (value, summary) = value(series);
                MetricSample {
                    name: key.name.clone(),
                    labels: key.labels.iter().cloned().collect(),
                    metric_type: metric_type.clone(),
                    value,
                    summary,
                    timestamp: timestamp.to_string(),
                }
            })
            .collect()
    }
}

/// In-memory counters, gauges and histograms shared by every component.
pub struct MetricsRecorder {
    counters: Family<Counter>,
    gauges: Family<Gauge>,
    histograms: Family<Histogram>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            counters: Family::new(),
            gauges: Family::new(),
            histograms: Family::new(),
        }
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        self.counters.with(MetricKey::new(name, labels), |c| {
            c.0.fetch_add(n, Ordering::Relaxed);
        });
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.gauges
            .with(MetricKey::new(name, labels), |g| g.update(|_| value));
    }

    /// Add `delta` (negative to decrement).
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        self.gauges
            .with(MetricKey::new(name, labels), |g| g.update(|v| v + delta));
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.histograms
            .with(MetricKey::new(name, labels), |h| h.observe(value));
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        self.histograms
            .get(&MetricKey::new(name, labels), Histogram::summary)
            .unwrap_or_default()
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&MetricKey::new(name, labels), |c| c.0.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.gauges
            .get(&MetricKey::new(name, labels), Gauge::get)
            .unwrap_or(0.0)
    }

    /// Every series, sorted by name.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let now = Utc::now().to_rfc3339();
        let mut out = self.counters.samples(MetricType::Counter, &now, |c| {
            (c.0.load(Ordering::Relaxed) as f64, None)
        });
        out.extend(
            self.gauges
                .samples(MetricType::Gauge, &now, |g| (g.get(), None)),
        );
        out.extend(self.histograms.samples(MetricType::Histogram, &now, |h| {
            let summary = h.summary();
            (summary.p50, Some(summary))
        }));
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_labels_are_order_independent() {
        let m = MetricsRecorder::new();
        m.counter_inc("model.writes", &[("result", "ok"), ("via", "ws")], 1);
        m.counter_inc("model.writes", &[("via", "ws"), ("result", "ok")], 2);
        assert_eq!(m.counter_get("model.writes", &[("result", "ok"), ("via", "ws")]), 3);
        assert_eq!(m.counter_get("model.writes", &[("result", "rejected")]), 0);
    }

    #[test]
    fn gauge_set_and_increment() {
        let m = MetricsRecorder::new();
        m.gauge_inc("gateway.connections.active", &[], 1.0);
        m.gauge_inc("gateway.connections.active", &[], 1.0);
        m.gauge_inc("gateway.connections.active", &[], -1.0);
        assert!((m.gauge_get("gateway.connections.active", &[]) - 1.0).abs() < f64::EPSILON);
        m.gauge_set("session.active", &[], 7.0);
        assert!((m.gauge_get("session.active", &[]) - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn histogram_percentiles() {
        let m = MetricsRecorder::new();
        for v in 1..=100 {
            m.histogram_observe("model.tick_us", &[], f64::from(v));
        }
        let s = m.histogram_summary("model.tick_us", &[]);
        assert_eq!(s.count, 100);
        assert!((s.p50 - 51.0).abs() < f64::EPSILON);
        assert!((s.p99 - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn histogram_window_is_bounded() {
        let m = MetricsRecorder::new();
        for _ in 0..(HISTOGRAM_WINDOW + 10) {
            m.histogram_observe("gateway.write_ms", &[], 1.0);
        }
        let s = m.histogram_summary("gateway.write_ms", &[]);
        assert_eq!(s.count as usize, HISTOGRAM_WINDOW + 10);
        assert!((s.sum - HISTOGRAM_WINDOW as f64).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_lists_all_types() {
        let m = MetricsRecorder::new();
        m.counter_inc("model.ticks", &[], 5);
        m.gauge_set("session.active", &[], 2.0);
        m.histogram_observe("model.tick_us", &[], 40.0);
        let samples = m.snapshot();
        let names: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["model.tick_us", "model.ticks", "session.active"]);
        assert_eq!(samples[0].metric_type, MetricType::Histogram);
        assert!(samples[0].summary.is_some());
        let json = serde_json::to_value(&samples[1]).unwrap();
        assert_eq!(json["metricType"], "counter");
        assert_eq!(json["value"], 5.0);
    }
}
