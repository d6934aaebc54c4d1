/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Live process introspection for dashboards.
//!
//! A [`Server`] samples a [`MetricSource`] into one shared buffer, turns the
//! samples into plot payloads and streams them to every registered client:
//! the plot layouts once, then one data message per tick.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use statscope::services::sources::{ProcessSource, RuntimeSource};
//! use statscope::{CompositeSource, Server};
//!
//! let source = CompositeSource::new()
//!     .with(Arc::new(ProcessSource::new()?))
//!     .with(Arc::new(RuntimeSource::current()));
//! let server = Server::builder(Arc::new(source)).build()?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! statscope::serve(listener, server, Default::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod registries;
pub mod runtime;
pub mod services;

pub use registries::plot::{
    Config, DescriptorState, EventDescriptor, LayoutSpec, Payload, PlotDescriptor, PlotLayout,
    PlotRegistry, Registry, RegistryError, ScatterType, Snapshot, Tick, TimeSeries,
    TimeSeriesBuilder, UserPlot, UserPlotError,
};
pub use runtime::{
    ConnectionHandle, ConnectionId, SchedLatencyProbe, Server, ServerBuilder, ServerConfigError,
    ServerOptions, SinkError, SnapshotSink, serve,
};
pub use statscope_core::{
    CatalogError, CompositeSource, Histogram, MetricCatalog, MetricDescription, MetricKind,
    MetricSource, SampleBuffer, SampleValue,
};
