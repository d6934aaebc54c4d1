/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

mod connections;
mod registry;
mod streaming;
mod websocket;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use statscope::registries::plot::{ScatterPlot, Subplot};
use statscope::{
    LayoutSpec, MetricDescription, MetricSource, Payload, PlotDescriptor, PlotLayout, SampleValue,
    ServerBuilder, TimeSeries, TimeSeriesBuilder, UserPlot,
};

pub const COUNTER: &str = "/test/events:events";

/// Exposes one counter that grows by `step` on every read.
pub struct CountingSource {
    reads: AtomicU64,
    step: u64,
}

impl CountingSource {
    pub fn new(step: u64) -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicU64::new(0),
            step,
        })
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl MetricSource for CountingSource {
    fn describe(&self) -> Vec<MetricDescription> {
        vec![MetricDescription::counter(COUNTER, "Events seen by tests.")]
    }

    fn read(&self, out: &mut [SampleValue]) {
        let reads = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        out[0] = SampleValue::Uint64(reads * self.step);
    }
}

pub fn counting_server(source: &Arc<CountingSource>) -> ServerBuilder {
    let source: Arc<dyn MetricSource> = source.clone();
    statscope::Server::builder(source)
}

pub fn scatter_layout(series: &[&str]) -> LayoutSpec {
    LayoutSpec::Static(PlotLayout::Scatter(ScatterPlot {
        title: "Test".to_string(),
        subplots: series
            .iter()
            .map(|name| Subplot::new(name, "%{y}"))
            .collect(),
        ..ScatterPlot::default()
    }))
}

/// Reports how far the counter moved since this connection's last tick.
pub fn delta_descriptor(id: &str) -> PlotDescriptor {
    PlotDescriptor::new(id, &[COUNTER], scatter_layout(&["events"]), |tick, state| {
        Payload::Uint64(vec![state.delta(0, tick.uint64(0))])
    })
}

pub fn constant_plot(name: &str, value: f64) -> UserPlot {
    TimeSeriesBuilder::new(name)
        .title("Constant")
        .add_series(TimeSeries::new("value"), move || value)
        .build()
        .expect("valid user plot")
}

#[test]
fn scenarios_binary_smoke_runs() {
    assert!(!statscope::registries::plot::builtin_plot_ids().is_empty());
}
