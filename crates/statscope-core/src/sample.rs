/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::time::Instant;

use serde::Serialize;

use crate::histogram::Histogram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic cumulative value.
    Counter,
    /// Instantaneous value that can go up and down.
    Gauge,
    Histogram,
}

/// One metric exposed by a [`crate::MetricSource`].
///
/// Names are slash-delimited paths ending in a `:unit` suffix, e.g.
/// `/process/memory/resident:bytes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDescription {
    pub name: String,
    pub kind: MetricKind,
    pub description: String,
}

impl MetricDescription {
    pub fn new(name: impl Into<String>, kind: MetricKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
        }
    }

    pub fn counter(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Counter, description)
    }

    pub fn gauge(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Gauge, description)
    }

    pub fn histogram(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Histogram, description)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SampleValue {
    /// Not read yet.
    #[default]
    Empty,
    Uint64(u64),
    Float64(f64),
    Histogram(Histogram),
}

impl SampleValue {
    /// Overwrites a histogram value in place, reusing the existing vectors.
    pub fn set_histogram(&mut self, buckets: &[f64], counts: impl IntoIterator<Item = u64>) {
        match self {
            SampleValue::Histogram(current) => {
                if current.buckets != buckets {
                    current.buckets.clear();
                    current.buckets.extend_from_slice(buckets);
                }
                current.counts.clear();
                current.counts.extend(counts);
            }
            other => {
                *other = SampleValue::Histogram(Histogram {
                    buckets: buckets.to_vec(),
                    counts: counts.into_iter().collect(),
                });
            }
        }
    }
}

/// Preallocated buffer holding one [`SampleValue`] per catalog slot.
///
/// The buffer is allocated once by [`crate::MetricCatalog::new_buffer`] and
/// refreshed in place on every tick.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub(crate) names: Vec<String>,
    pub(crate) values: Vec<SampleValue>,
    pub(crate) read_at: Instant,
    pub(crate) reads: u64,
}

impl SampleBuffer {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// When the buffer was last refreshed.
    pub fn read_at(&self) -> Instant {
        self.read_at
    }

    /// Number of refreshes applied to this buffer.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn value(&self, slot: usize) -> &SampleValue {
        &self.values[slot]
    }

    pub fn uint64(&self, slot: usize) -> u64 {
        match &self.values[slot] {
            SampleValue::Uint64(value) => *value,
            other => self.kind_violation(slot, "uint64", other),
        }
    }

    pub fn float64(&self, slot: usize) -> f64 {
        match &self.values[slot] {
            SampleValue::Float64(value) => *value,
            other => self.kind_violation(slot, "float64", other),
        }
    }

    pub fn histogram(&self, slot: usize) -> &Histogram {
        match &self.values[slot] {
            SampleValue::Histogram(value) => value,
            other => self.kind_violation(slot, "histogram", other),
        }
    }

    fn kind_violation(&self, slot: usize, expected: &str, found: &SampleValue) -> ! {
        panic!(
            "metric {} holds {found:?}, expected a {expected} value",
            self.names[slot]
        )
    }
}
