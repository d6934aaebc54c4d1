/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Histogram values and the bucket downsampling used by heatmap plots.
//!
//! Host histograms can carry hundreds of buckets; heatmaps render at most
//! [`MAX_BUCKETS`] rows. Consecutive buckets are merged in groups of a fixed
//! factor, computed once per plot since a metric's bucket *count* never
//! changes while the process runs (only the counts do).

use serde::Serialize;

/// Default upper bound on the number of buckets a heatmap renders.
pub const MAX_BUCKETS: usize = 100;

/// A distribution sample: ordered bucket boundaries plus one count per bucket.
///
/// `buckets` holds `counts.len() + 1` strictly increasing boundaries; bucket
/// `i` covers `[buckets[i], buckets[i + 1])`. The first and last boundaries
/// may be infinite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Histogram {
    pub buckets: Vec<f64>,
    pub counts: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistogramShapeError {
    TooFewBoundaries(usize),
    CountMismatch { boundaries: usize, counts: usize },
    Unordered { index: usize },
}

impl std::fmt::Display for HistogramShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewBoundaries(n) => {
                write!(f, "histogram needs at least 2 bucket boundaries, got {n}")
            }
            Self::CountMismatch { boundaries, counts } => write!(
                f,
                "histogram has {boundaries} boundaries but {counts} counts (expected {})",
                boundaries.saturating_sub(1)
            ),
            Self::Unordered { index } => {
                write!(f, "histogram boundary {index} is not strictly increasing")
            }
        }
    }
}

impl std::error::Error for HistogramShapeError {}

impl Histogram {
    /// Builds a histogram with all counts at zero.
    pub fn with_bounds(buckets: Vec<f64>) -> Result<Self, HistogramShapeError> {
        let counts = vec![0; buckets.len().saturating_sub(1)];
        Self::new(buckets, counts)
    }

    pub fn new(buckets: Vec<f64>, counts: Vec<u64>) -> Result<Self, HistogramShapeError> {
        if buckets.len() < 2 {
            return Err(HistogramShapeError::TooFewBoundaries(buckets.len()));
        }
        if counts.len() + 1 != buckets.len() {
            return Err(HistogramShapeError::CountMismatch {
                boundaries: buckets.len(),
                counts: counts.len(),
            });
        }
        if let Some(index) = buckets.windows(2).position(|pair| pair[0] >= pair[1]) {
            return Err(HistogramShapeError::Unordered { index: index + 1 });
        }
        Ok(Self { buckets, counts })
    }

    /// Index of the bucket `value` falls into, if any.
    pub fn bucket_index(&self, value: f64) -> Option<usize> {
        bucket_index(&self.buckets, value)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Index of the bucket of `bounds` containing `value`; `None` when `value`
/// lies outside every bucket (or is NaN).
pub fn bucket_index(bounds: &[f64], value: f64) -> Option<usize> {
    if value.is_nan() || bounds.len() < 2 {
        return None;
    }
    // First boundary strictly greater than `value` closes its bucket.
    let upper = bounds.partition_point(|bound| *bound <= value);
    if upper == 0 || upper == bounds.len() {
        // The last bucket is closed when its bound is +Inf.
        if upper == bounds.len() && bounds[bounds.len() - 1] == f64::INFINITY {
            return Some(bounds.len() - 2);
        }
        return None;
    }
    Some(upper - 1)
}

/// Number of consecutive buckets merged into one rendered bucket so that at
/// most `max_buckets` remain. Never less than 1.
pub fn downsample_factor(bucket_count: usize, max_buckets: usize) -> usize {
    let max_buckets = max_buckets.max(1);
    if bucket_count <= max_buckets {
        return 1;
    }
    bucket_count.div_ceil(max_buckets)
}

/// Downsamples bucket upper bounds by `factor`.
///
/// The first boundary is dropped (only upper bounds are rendered), then every
/// `factor`-th remaining bound is kept. A trailing partial group gets the
/// last bound. A final `+Inf` is replaced so the last two groups have the
/// same width, since renderers reject unbounded axes. With a single finite
/// bound left the last group is as wide as that bound (at least 1).
pub fn downsample_bounds(buckets: &[f64], factor: usize) -> Vec<f64> {
    let factor = factor.max(1);
    let upper = buckets.get(1..).unwrap_or_default();

    let mut bounds: Vec<f64> = upper
        .iter()
        .enumerate()
        .filter(|(i, _)| (i + 1) % factor == 0)
        .map(|(_, bound)| *bound)
        .collect();
    if upper.len() % factor != 0 {
        if let Some(last) = upper.last() {
            bounds.push(*last);
        }
    }

    let n = bounds.len();
    if n > 0 && bounds[n - 1] == f64::INFINITY {
        bounds[n - 1] = match n {
            1 => upper
                .iter()
                .rev()
                .find(|bound| bound.is_finite())
                .map_or(1.0, |bound| bound + bound.abs().max(1.0)),
            2 => bounds[0] + bounds[0].abs().max(1.0),
            _ => bounds[n - 2] + (bounds[n - 2] - bounds[n - 3]),
        };
    }
    bounds
}

/// Downsamples bucket counts by `factor` into `out`, reusing its allocation.
///
/// Counts are summed in groups of `factor`, aligned with
/// [`downsample_bounds`]; a trailing partial group forms the last bucket.
/// The total count is preserved exactly.
pub fn downsample_counts_into(counts: &[u64], factor: usize, out: &mut Vec<u64>) {
    out.clear();
    if factor <= 1 {
        out.extend_from_slice(counts);
        return;
    }
    out.extend(counts.chunks(factor).map(|group| group.iter().sum::<u64>()));
}

pub fn downsample_counts(counts: &[u64], factor: usize) -> Vec<u64> {
    let mut out = Vec::with_capacity(counts.len().div_ceil(factor.max(1)));
    downsample_counts_into(counts, factor, &mut out);
    out
}

/// Row positions `0..n` used as heatmap y values; the real boundaries travel
/// separately as custom data for tick labels.
pub fn bucket_positions(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}
