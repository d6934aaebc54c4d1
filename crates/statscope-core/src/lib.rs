/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Portable kernel of statscope: the metric catalog, the sample model and
//! the histogram downsampling used by heatmap plots.
//!
//! Nothing in here depends on an async runtime or a transport.

pub mod catalog;
pub mod histogram;
pub mod sample;

pub use catalog::{CatalogError, CompositeSource, MetricCatalog, MetricSource};
pub use histogram::{Histogram, HistogramShapeError, MAX_BUCKETS};
pub use sample::{MetricDescription, MetricKind, SampleBuffer, SampleValue};
