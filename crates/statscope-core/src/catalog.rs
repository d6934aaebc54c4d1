/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Metric catalog: the stable name → slot mapping over a [`MetricSource`].
//!
//! The catalog is enumerated once. Slot `i` always refers to the `i`-th
//! metric the source described, so plot descriptors can resolve their
//! metrics to slots at build time and index the [`SampleBuffer`] directly on
//! every tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::sample::{MetricDescription, SampleBuffer, SampleValue};

/// The capability a host provides to expose its metrics.
///
/// `describe` must return the same metrics in the same order for the
/// lifetime of the source. `read` receives one value slot per described
/// metric, in `describe` order, and overwrites them with current values.
pub trait MetricSource: Send + Sync {
    fn describe(&self) -> Vec<MetricDescription>;

    fn read(&self, out: &mut [SampleValue]);
}

impl<S: MetricSource + ?Sized> MetricSource for Arc<S> {
    fn describe(&self) -> Vec<MetricDescription> {
        (**self).describe()
    }

    fn read(&self, out: &mut [SampleValue]) {
        (**self).read(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The source exposes no metrics at all.
    Unavailable,
    DuplicateMetric(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "metric source exposes no metrics"),
            Self::DuplicateMetric(name) => {
                write!(f, "metric {name} is exposed more than once")
            }
        }
    }
}

impl std::error::Error for CatalogError {}

pub struct MetricCatalog {
    source: Arc<dyn MetricSource>,
    descriptions: Vec<MetricDescription>,
    slots: HashMap<String, usize>,
}

impl std::fmt::Debug for MetricCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricCatalog")
            .field("metrics", &self.descriptions.len())
            .finish_non_exhaustive()
    }
}

impl MetricCatalog {
    /// Queries the source once and assigns every metric a slot.
    pub fn enumerate(source: Arc<dyn MetricSource>) -> Result<Self, CatalogError> {
        let descriptions = source.describe();
        if descriptions.is_empty() {
            return Err(CatalogError::Unavailable);
        }

        let mut slots = HashMap::with_capacity(descriptions.len());
        for (slot, description) in descriptions.iter().enumerate() {
            if slots.insert(description.name.clone(), slot).is_some() {
                return Err(CatalogError::DuplicateMetric(description.name.clone()));
            }
        }

        log::debug!("catalog: enumerated {} metrics", descriptions.len());
        Ok(Self {
            source,
            descriptions,
            slots,
        })
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn descriptions(&self) -> &[MetricDescription] {
        &self.descriptions
    }

    /// Allocates a buffer shaped for this catalog. Values stay
    /// [`SampleValue::Empty`] until the first [`Self::refresh`].
    pub fn new_buffer(&self) -> SampleBuffer {
        SampleBuffer {
            names: self.descriptions.iter().map(|d| d.name.clone()).collect(),
            values: vec![SampleValue::Empty; self.descriptions.len()],
            read_at: Instant::now(),
            reads: 0,
        }
    }

    /// Re-reads every metric into `buffer`, keeping slot assignment.
    ///
    /// Callers sharing the buffer must hold its lock for the whole
    /// refresh-then-extract sequence.
    ///
    /// # Panics
    ///
    /// If `buffer` was not shaped by this catalog, or if the source hands
    /// back a malformed histogram. Both are contract breaches by the host.
    pub fn refresh(&self, buffer: &mut SampleBuffer) {
        assert_eq!(
            buffer.values.len(),
            self.descriptions.len(),
            "sample buffer has {} slots, catalog has {} metrics",
            buffer.values.len(),
            self.descriptions.len()
        );

        self.source.read(&mut buffer.values);
        buffer.read_at = Instant::now();
        buffer.reads += 1;

        for (slot, value) in buffer.values.iter().enumerate() {
            if let SampleValue::Histogram(histogram) = value {
                assert_eq!(
                    histogram.counts.len() + 1,
                    histogram.buckets.len(),
                    "metric {} returned {} counts for {} bucket boundaries",
                    self.descriptions[slot].name,
                    histogram.counts.len(),
                    histogram.buckets.len()
                );
            }
        }
    }
}

/// Concatenates several sources into a single metric namespace.
pub struct CompositeSource {
    parts: Vec<(Arc<dyn MetricSource>, usize)>,
}

impl CompositeSource {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Appends a source. Its metric count is fixed at this point.
    pub fn with(mut self, source: Arc<dyn MetricSource>) -> Self {
        let len = source.describe().len();
        self.parts.push((source, len));
        self
    }
}

impl Default for CompositeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for CompositeSource {
    fn describe(&self) -> Vec<MetricDescription> {
        let mut all = Vec::new();
        for (source, len) in &self.parts {
            let described = source.describe();
            debug_assert_eq!(described.len(), *len, "source changed its metric set");
            all.extend(described);
        }
        all
    }

    fn read(&self, out: &mut [SampleValue]) {
        let mut rest = out;
        for (source, len) in &self.parts {
            let (head, tail) = rest.split_at_mut(*len);
            source.read(head);
            rest = tail;
        }
    }
}
