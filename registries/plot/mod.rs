/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Plot descriptors and their per-connection extraction state.
//!
//! A [`PlotDescriptor`] binds a set of metric names to a [`PlotLayout`] and
//! an extraction function. Extraction functions are pure over their inputs:
//! any memory they need between ticks (previous counter values for rates,
//! the cached downsample factor) lives in an explicit [`DescriptorState`]
//! that the broadcaster owns and threads through every call.

pub(crate) mod builtin;
pub(crate) mod layout;
pub(crate) mod registry;
pub(crate) mod user;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use statscope_core::histogram::{downsample_counts_into, downsample_factor};
use statscope_core::{Histogram, SampleBuffer};

pub use builtin::{EVENT_LAST_MARK, builtin_plot_ids, is_reserved_plot_name};
pub use layout::{
    HeatmapAxes, HeatmapHover, HeatmapPlot, HeatmapYAxis, PlotLayout, ScatterAxes, ScatterPlot,
    ScatterType, ScatterYAxis, Subplot, WeightedColor,
};
pub use registry::{Config, EventDescriptor, PlotRegistry, Registry, RegistryError, Snapshot};
pub use user::{TimeSeries, TimeSeriesBuilder, UserPlot, UserPlotError};

/// Values produced by one plot for one tick, in sub-series order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Uint64(Vec<u64>),
    Float64(Vec<f64>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Uint64(values) => values.len(),
            Payload::Float64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only view handed to extraction and layout functions.
///
/// Metric accessors take the position of the metric in the descriptor's
/// `required_metrics`, not a catalog slot.
pub struct Tick<'a> {
    samples: &'a SampleBuffer,
    slots: &'a [usize],
    max_buckets: usize,
}

impl<'a> Tick<'a> {
    pub(crate) fn new(samples: &'a SampleBuffer, slots: &'a [usize], max_buckets: usize) -> Self {
        Self {
            samples,
            slots,
            max_buckets,
        }
    }

    pub fn uint64(&self, metric: usize) -> u64 {
        self.samples.uint64(self.slots[metric])
    }

    pub fn float64(&self, metric: usize) -> f64 {
        self.samples.float64(self.slots[metric])
    }

    pub fn histogram(&self, metric: usize) -> &'a Histogram {
        self.samples.histogram(self.slots[metric])
    }

    /// When the underlying samples were read.
    pub fn now(&self) -> Instant {
        self.samples.read_at()
    }

    pub fn max_buckets(&self) -> usize {
        self.max_buckets
    }
}

pub type ExtractFn = Arc<dyn Fn(&Tick<'_>, &mut DescriptorState) -> Payload + Send + Sync>;

pub type SampledLayoutFn = Arc<dyn Fn(&Tick<'_>) -> PlotLayout + Send + Sync>;

/// How a descriptor obtains its layout.
#[derive(Clone)]
pub enum LayoutSpec {
    Static(PlotLayout),
    /// Computed once from the first refreshed samples, for heatmaps whose
    /// axis labels depend on real bucket boundaries.
    Sampled(SampledLayoutFn),
}

impl std::fmt::Debug for LayoutSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutSpec::Static(layout) => f.debug_tuple("Static").field(layout).finish(),
            LayoutSpec::Sampled(_) => f.write_str("Sampled(..)"),
        }
    }
}

#[derive(Clone)]
pub struct PlotDescriptor {
    pub(crate) id: String,
    pub(crate) required_metrics: Vec<String>,
    pub(crate) layout: LayoutSpec,
    pub(crate) extract: ExtractFn,
}

impl std::fmt::Debug for PlotDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotDescriptor")
            .field("id", &self.id)
            .field("required_metrics", &self.required_metrics)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl PlotDescriptor {
    pub fn new(
        id: impl Into<String>,
        required_metrics: &[&str],
        layout: LayoutSpec,
        extract: impl Fn(&Tick<'_>, &mut DescriptorState) -> Payload + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            required_metrics: required_metrics.iter().map(|m| m.to_string()).collect(),
            layout,
            extract: Arc::new(extract),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn required_metrics(&self) -> &[String] {
        &self.required_metrics
    }
}

/// Mutable memory of one plot for one connection.
///
/// Rates and deltas are computed against the previous tick *of the same
/// connection*, so connections with different frequencies never disturb
/// each other.
#[derive(Debug, Default, Clone)]
pub struct DescriptorState {
    previous: Vec<Option<u64>>,
    previous_values: Vec<f64>,
    previous_at: Option<Instant>,
    factor: Option<(usize, usize)>,
    counts: Vec<u64>,
}

impl DescriptorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Growth of a cumulative counter since the previous call for `lane`.
    /// The first observation yields 0 so a long-running process does not
    /// show a spike when a client connects.
    pub fn delta(&mut self, lane: usize, current: u64) -> u64 {
        if self.previous.len() <= lane {
            self.previous.resize(lane + 1, None);
        }
        match self.previous[lane].replace(current) {
            Some(previous) => current.saturating_sub(previous),
            None => 0,
        }
    }

    /// Per-second rates of cumulative values since the previous call.
    /// Returns zeros on the first call.
    pub fn rates(&mut self, now: Instant, current: &[f64]) -> Vec<f64> {
        let rates = match self.previous_at {
            Some(previous_at) if self.previous_values.len() == current.len() => {
                let seconds = now.saturating_duration_since(previous_at).as_secs_f64();
                if seconds > 0.0 {
                    current
                        .iter()
                        .zip(&self.previous_values)
                        .map(|(cur, prev)| ((cur - prev) / seconds).max(0.0))
                        .collect()
                } else {
                    vec![0.0; current.len()]
                }
            }
            _ => vec![0.0; current.len()],
        };
        self.previous_values.clear();
        self.previous_values.extend_from_slice(current);
        self.previous_at = Some(now);
        rates
    }

    /// Downsample factor for `bucket_count` buckets, computed on first use
    /// and cached.
    ///
    /// # Panics
    ///
    /// If the bucket count differs from the one the factor was computed for.
    pub fn downsample_factor(&mut self, bucket_count: usize, max_buckets: usize) -> usize {
        match self.factor {
            Some((count, factor)) => {
                assert_eq!(
                    count, bucket_count,
                    "histogram bucket count changed from {count} to {bucket_count}"
                );
                factor
            }
            None => {
                let factor = downsample_factor(bucket_count, max_buckets);
                self.factor = Some((bucket_count, factor));
                factor
            }
        }
    }

    /// Downsampled counts of `histogram`, using this state's scratch buffer.
    pub fn downsample(&mut self, histogram: &Histogram, max_buckets: usize) -> &[u64] {
        let factor = self.downsample_factor(histogram.counts.len(), max_buckets);
        downsample_counts_into(&histogram.counts, factor, &mut self.counts);
        &self.counts
    }
}
