//! One-pass aggregation of samples into latency/throughput statistics.
//!
//! A [`Builder`] consumes samples in a single pass, keeping counters, byte
//! totals, first/last timestamps, a status-code histogram, the distinct
//! error set, and a streaming quantile estimator, once globally and once
//! per method in the fixed set. [`Builder::complete`] derives the immutable
//! [`Metrics`].

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quantile::QuantileStream;
use crate::sample::{duration_nanos, Sample};
use crate::target::Method;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    #[serde(with = "duration_nanos")]
    pub mean: Duration,
    #[serde(with = "duration_nanos")]
    pub p50: Duration,
    #[serde(with = "duration_nanos")]
    pub p95: Duration,
    #[serde(with = "duration_nanos")]
    pub p99: Duration,
    #[serde(with = "duration_nanos")]
    pub max: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ByteStats {
    pub total: u64,
    pub mean: f64,
}

/// Aggregated statistics over a set of samples. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub requests: u64,
    /// Fraction of samples with a 2xx status, in `[0, 1]`.
    pub success: f64,
    /// Time between the earliest and the latest request start.
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
    /// Extra time from the last request start until its response finished.
    #[serde(with = "duration_nanos")]
    pub wait: Duration,
    pub latencies: LatencyStats,
    pub bytes_in: ByteStats,
    pub bytes_out: ByteStats,
    pub status_codes: BTreeMap<String, u64>,
    pub errors: Vec<String>,
    /// The same statistics over the per-method subsets. Every method of the
    /// fixed set is present, even with an empty subset.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_method: BTreeMap<Method, Metrics>,
}

#[derive(Debug, Default)]
struct Scope {
    requests: u64,
    success: u64,
    total_latency: Duration,
    max_latency: Duration,
    bytes_in: u64,
    bytes_out: u64,
    earliest: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
    latest_end: Option<DateTime<Utc>>,
    status_codes: BTreeMap<String, u64>,
    errors: BTreeSet<String>,
    latencies: QuantileStream,
}

impl Scope {
    fn add(&mut self, sample: &Sample) {
        self.requests += 1;
        if (200..300).contains(&sample.code) {
            self.success += 1;
        }
        *self
            .status_codes
            .entry(sample.code.to_string())
            .or_default() += 1;

        self.total_latency += sample.latency;
        self.max_latency = self.max_latency.max(sample.latency);
        self.latencies.observe(sample.latency.as_nanos() as f64);
        self.bytes_in += sample.bytes_in;
        self.bytes_out += sample.bytes_out;

        if self.earliest.is_none() {
            self.earliest = Some(sample.timestamp);
        }
        if self.latest.is_none_or(|t| sample.timestamp > t) {
            self.latest = Some(sample.timestamp);
        }
        let end = sample.end();
        if self.latest_end.is_none_or(|t| end > t) {
            self.latest_end = Some(end);
        }

        if !sample.error.is_empty() {
            self.errors.insert(sample.error.clone());
        }
    }

    fn complete(mut self) -> Metrics {
        let mut m = Metrics {
            requests: self.requests,
            status_codes: self.status_codes,
            errors: self.errors.into_iter().collect(),
            ..Metrics::default()
        };
        if self.requests == 0 {
            return m;
        }
        let requests = self.requests as f64;

        m.success = self.success as f64 / requests;
        m.duration = match (self.earliest, self.latest) {
            (Some(earliest), Some(latest)) => (latest - earliest).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };
        m.wait = match (self.latest, self.latest_end) {
            (Some(latest), Some(end)) => (end - latest).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };
        m.latencies = LatencyStats {
            mean: Duration::from_nanos((self.total_latency.as_nanos() as f64 / requests) as u64),
            p50: Duration::from_nanos(self.latencies.query(0.50) as u64),
            p95: Duration::from_nanos(self.latencies.query(0.95) as u64),
            p99: Duration::from_nanos(self.latencies.query(0.99) as u64),
            max: self.max_latency,
        };
        m.bytes_in = ByteStats {
            total: self.bytes_in,
            mean: self.bytes_in as f64 / requests,
        };
        m.bytes_out = ByteStats {
            total: self.bytes_out,
            mean: self.bytes_out as f64 / requests,
        };
        m
    }
}

/// One-pass accumulator for [`Metrics`].
#[derive(Debug)]
pub struct Builder {
    global: Scope,
    by_method: BTreeMap<Method, Scope>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            global: Scope::default(),
            by_method: Method::ALL
                .into_iter()
                .map(|m| (m, Scope::default()))
                .collect(),
        }
    }

    /// Fold one sample in. Samples whose method is outside the fixed set
    /// are dropped entirely, keeping the per-method breakdown a partition
    /// of the global counts.
    pub fn add(&mut self, sample: &Sample) {
        let Ok(method) = sample.method.parse::<Method>() else {
            return;
        };
        self.global.add(sample);
        self.by_method
            .get_mut(&method)
            .expect("seeded with the full method set")
            .add(sample);
    }

    /// Finalize the derived fields. Total over zero samples yields an
    /// all-zero `Metrics` without faulting.
    pub fn complete(self) -> Metrics {
        let mut m = self.global.complete();
        m.by_method = self
            .by_method
            .into_iter()
            .map(|(method, scope)| (method, scope.complete()))
            .collect();
        m
    }
}

/// Aggregate a slice of samples in one pass.
pub fn metrics(samples: &[Sample]) -> Metrics {
    let mut builder = Builder::new();
    for sample in samples {
        builder.add(sample);
    }
    builder.complete()
}
