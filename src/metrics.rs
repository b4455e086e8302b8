//! Observability for the translation path: latency histograms (p50/p95/p99)
//! and plain counters for cache and provider outcomes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// A span measuring elapsed time from creation to `finish`.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Record elapsed microseconds and return them.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

/// Fixed-capacity ring of recent samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: f64) {
        let capacity = self.samples.len();
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

#[derive(Default)]
struct Registry {
    histograms: HashMap<&'static str, SampleRing>,
    counters: HashMap<&'static str, u64>,
}

pub struct MetricsRegistry {
    inner: Mutex<Registry>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registry::default()),
            ring_capacity: 1024,
        }
    }

    /// Record a latency sample (microseconds).
    pub fn record(&self, name: &'static str, value_us: f64) {
        let capacity = self.ring_capacity;
        self.inner
            .lock()
            .histograms
            .entry(name)
            .or_insert_with(|| SampleRing::new(capacity))
            .push(value_us);
        tracing::trace!(metric = name, value_us, "metric_recorded");
    }

    pub fn incr(&self, name: &'static str) {
        *self.inner.lock().counters.entry(name).or_insert(0) += 1;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.inner
            .lock()
            .histograms
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock();
        let histograms = inner
            .histograms
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    HistogramSummary {
                        p50_us: ring.percentile(50.0),
                        p95_us: ring.percentile(95.0),
                        p99_us: ring.percentile(99.0),
                        count: ring.count,
                    },
                )
            })
            .collect();
        let counters = inner
            .counters
            .iter()
            .map(|(&name, &value)| (name.to_string(), value))
            .collect();
        MetricsSummary {
            histograms,
            counters,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub histograms: HashMap<String, HistogramSummary>,
    pub counters: HashMap<String, u64>,
}

/// Well-known metric names.
pub mod metric_names {
    pub const TRANSLATE_TOTAL: &str = "translate_total_us";
    pub const PROVIDER_CALL: &str = "provider_call_us";
    pub const CACHE_HIT: &str = "cache_hit";
    pub const CACHE_MISS: &str = "cache_miss";
    pub const PROVIDER_FAILURE: &str = "provider_failure";
    pub const TRANSLATE_SKIPPED: &str = "translate_skipped";
    pub const STALE_RESULT_DROPPED: &str = "stale_result_dropped";
}
