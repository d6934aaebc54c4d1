/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Concrete [`statscope_core::MetricSource`] implementations for a Rust host.
//!
//! Metric names follow the `/area/what:unit` convention. Built-in plots refer
//! to the constants exported here.

pub mod alloc;
pub mod executor;
pub mod probe;
pub mod process;

pub use alloc::{AllocStats, AllocatorSource, TrackingAllocator};
pub use executor::RuntimeSource;
pub use probe::{Counter, FloatGauge, Gauge, HistogramRecorder, Probe, ProbeError};
pub use process::{ProcessSource, ProcessSourceError};
