/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Host instrumentation: counters, gauges and histograms the embedding
//! application updates itself, exposed as an ordinary [`MetricSource`].
//!
//! Handles returned by the registration methods are cheap to clone and
//! lock-free to update. The metric set is fixed the first time the probe is
//! described (i.e. handed to a catalog); later registrations are rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use statscope_core::histogram::bucket_index;
use statscope_core::{
    Histogram, HistogramShapeError, MetricDescription, MetricSource, SampleValue,
};

/// Unix time in milliseconds of the most recent [`Probe::mark`].
pub const LAST_MARK: &str = "/events/last-mark:unix-ms";

/// Timer wake-up lateness measured by the scheduling latency worker.
pub const SCHED_LATENCIES: &str = "/sched/latencies:seconds";

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    DuplicateMetric(String),
    /// The probe was already described to a catalog.
    Sealed(String),
    Histogram {
        name: String,
        source: HistogramShapeError,
    },
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateMetric(name) => write!(f, "probe metric {name} already registered"),
            Self::Sealed(name) => write!(
                f,
                "cannot register {name}: probe metrics are fixed once enumerated"
            ),
            Self::Histogram { name, source } => {
                write!(f, "invalid bucket boundaries for {name}: {source}")
            }
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Histogram { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicU64>);

impl Gauge {
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge holding an `f64`, stored as its bit pattern.
#[derive(Debug, Clone, Default)]
pub struct FloatGauge(Arc<AtomicU64>);

impl FloatGauge {
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct HistogramCells {
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
}

/// Records observations into fixed bucket boundaries.
#[derive(Debug, Clone)]
pub struct HistogramRecorder(Arc<HistogramCells>);

impl HistogramRecorder {
    /// Counts `value` into its bucket. Values outside the boundaries and NaN
    /// are dropped.
    pub fn record(&self, value: f64) {
        if let Some(index) = bucket_index(&self.0.bounds, value) {
            self.0.counts[index].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_duration(&self, duration: Duration) {
        self.record(duration.as_secs_f64());
    }

    pub fn bounds(&self) -> &[f64] {
        &self.0.bounds
    }

    pub fn total(&self) -> u64 {
        let counts = &self.0.counts;
        counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

#[derive(Debug)]
enum Cell {
    Uint(Arc<AtomicU64>),
    Float(Arc<AtomicU64>),
    Histogram(Arc<HistogramCells>),
}

#[derive(Debug)]
struct Registered {
    description: MetricDescription,
    cell: Cell,
}

#[derive(Debug, Default)]
struct Metrics {
    entries: Vec<Registered>,
    sealed: bool,
}

#[derive(Debug)]
struct ProbeInner {
    metrics: RwLock<Metrics>,
    last_mark: Gauge,
}

/// Registry of host-updated metrics. Clones share the same metrics.
#[derive(Debug, Clone)]
pub struct Probe {
    inner: Arc<ProbeInner>,
}

impl Probe {
    pub fn new() -> Self {
        let last_mark = Gauge::default();
        let metrics = Metrics {
            entries: vec![Registered {
                description: MetricDescription::gauge(
                    LAST_MARK,
                    "Unix time in milliseconds of the most recent host mark.",
                ),
                cell: Cell::Uint(last_mark.0.clone()),
            }],
            sealed: false,
        };
        Self {
            inner: Arc::new(ProbeInner {
                metrics: RwLock::new(metrics),
                last_mark,
            }),
        }
    }

    /// Records the current wall-clock time as the `lastmark` event.
    pub fn mark(&self) {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_millis() as u64);
        self.inner.last_mark.set(millis);
    }

    pub fn counter(&self, name: &str, description: &str) -> Result<Counter, ProbeError> {
        let counter = Counter::default();
        self.register(
            MetricDescription::counter(name, description),
            Cell::Uint(counter.0.clone()),
        )?;
        Ok(counter)
    }

    pub fn gauge(&self, name: &str, description: &str) -> Result<Gauge, ProbeError> {
        let gauge = Gauge::default();
        self.register(
            MetricDescription::gauge(name, description),
            Cell::Uint(gauge.0.clone()),
        )?;
        Ok(gauge)
    }

    pub fn float_gauge(&self, name: &str, description: &str) -> Result<FloatGauge, ProbeError> {
        let gauge = FloatGauge::default();
        self.register(
            MetricDescription::gauge(name, description),
            Cell::Float(gauge.0.clone()),
        )?;
        Ok(gauge)
    }

    /// Registers a histogram with the given ordered bucket boundaries.
    pub fn histogram(
        &self,
        name: &str,
        description: &str,
        bounds: Vec<f64>,
    ) -> Result<HistogramRecorder, ProbeError> {
        let shape = Histogram::with_bounds(bounds).map_err(|source| ProbeError::Histogram {
            name: name.to_string(),
            source,
        })?;
        let cells = Arc::new(HistogramCells {
            counts: (0..shape.counts.len()).map(|_| AtomicU64::new(0)).collect(),
            bounds: shape.buckets,
        });
        self.register(
            MetricDescription::histogram(name, description),
            Cell::Histogram(cells.clone()),
        )?;
        Ok(HistogramRecorder(cells))
    }

    fn register(&self, description: MetricDescription, cell: Cell) -> Result<(), ProbeError> {
        let mut metrics = self.inner.metrics.write();
        if metrics.sealed {
            return Err(ProbeError::Sealed(description.name));
        }
        if metrics
            .entries
            .iter()
            .any(|entry| entry.description.name == description.name)
        {
            return Err(ProbeError::DuplicateMetric(description.name));
        }
        log::debug!("probe: registered {}", description.name);
        metrics.entries.push(Registered { description, cell });
        Ok(())
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for Probe {
    fn describe(&self) -> Vec<MetricDescription> {
        let mut metrics = self.inner.metrics.write();
        metrics.sealed = true;
        metrics
            .entries
            .iter()
            .map(|entry| entry.description.clone())
            .collect()
    }

    fn read(&self, out: &mut [SampleValue]) {
        let metrics = self.inner.metrics.read();
        for (entry, value) in metrics.entries.iter().zip(out.iter_mut()) {
            match &entry.cell {
                Cell::Uint(cell) => *value = SampleValue::Uint64(cell.load(Ordering::Relaxed)),
                Cell::Float(cell) => {
                    *value = SampleValue::Float64(f64::from_bits(cell.load(Ordering::Relaxed)))
                }
                Cell::Histogram(cells) => value.set_histogram(
                    &cells.bounds,
                    cells.counts.iter().map(|c| c.load(Ordering::Relaxed)),
                ),
            }
        }
    }
}

/// Bucket boundaries for [`SCHED_LATENCIES`]: zero, then eight buckets per
/// doubling from 1µs to about 16s, then an unbounded overflow bucket.
pub fn sched_latency_bounds() -> Vec<f64> {
    let mut bounds = Vec::with_capacity(196);
    bounds.push(0.0);
    let doublings = (0..=192).map(|step| f64::from(step) / 8.0);
    bounds.extend(doublings.map(|exp| 1e-6 * 2f64.powf(exp)));
    bounds.push(f64::INFINITY);
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use statscope_core::MetricCatalog;

    #[test]
    fn probe_exposes_registered_metrics_in_order() {
        let probe = Probe::new();
        let requests = probe.counter("/app/requests:count", "Requests.").unwrap();
        let load = probe.float_gauge("/app/load:ratio", "Load.").unwrap();
        let bounds = vec![0.0, 10.0, 100.0, f64::INFINITY];
        let sizes = probe.histogram("/app/size:bytes", "Size.", bounds).unwrap();

        requests.add(3);
        requests.incr();
        load.set(0.5);
        sizes.record(5.0);
        sizes.record(50.0);
        sizes.record(1e9);
        sizes.record(f64::NAN);

        let catalog = MetricCatalog::enumerate(Arc::new(probe.clone())).unwrap();
        assert_eq!(catalog.slot(LAST_MARK), Some(0));
        let mut buffer = catalog.new_buffer();
        catalog.refresh(&mut buffer);

        assert_eq!(buffer.uint64(1), 4);
        assert_eq!(buffer.float64(2), 0.5);
        assert_eq!(buffer.histogram(3).counts, vec![1, 1, 1]);
        assert_eq!(buffer.uint64(0), 0);
    }

    #[test]
    fn mark_sets_last_mark_to_wall_clock_millis() {
        let probe = Probe::new();
        probe.mark();
        let mut out = vec![SampleValue::Empty];
        probe.read(&mut out);
        let SampleValue::Uint64(ms) = out[0] else {
            panic!("last mark should be an integer, got {:?}", out[0]);
        };
        assert!(ms > 1_600_000_000_000);
    }

    #[test]
    fn duplicate_and_late_registrations_are_rejected() {
        let probe = Probe::new();
        probe.gauge("/app/queue:items", "Queue.").unwrap();
        assert_eq!(
            probe.gauge("/app/queue:items", "Queue.").unwrap_err(),
            ProbeError::DuplicateMetric("/app/queue:items".into())
        );

        probe.describe();
        assert!(matches!(
            probe.counter("/app/late:events", "Late."),
            Err(ProbeError::Sealed(_))
        ));
    }

    #[test]
    fn unordered_histogram_bounds_are_rejected() {
        let probe = Probe::new();
        let err = probe
            .histogram("/app/bad:seconds", "Bad.", vec![1.0, 0.0])
            .unwrap_err();
        assert!(matches!(err, ProbeError::Histogram { .. }));
    }

    #[test]
    fn sched_latency_bounds_are_increasing_and_unbounded() {
        let bounds = sched_latency_bounds();
        assert!(bounds.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(bounds.last(), Some(&f64::INFINITY));
        assert!(Histogram::with_bounds(bounds).is_ok());
    }
}
