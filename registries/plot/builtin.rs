/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Plots every server registers before any user plot.
//!
//! Each plot names the metrics it needs; a plot whose metrics are missing
//! from the catalog (platform without thread counts, no tracking allocator,
//! no scheduling probe) is disabled at build time instead of failing.

use statscope_core::histogram::{
    bucket_positions, downsample_bounds, downsample_counts, downsample_factor,
};

use super::layout::{
    HeatmapAxes, HeatmapHover, HeatmapPlot, HeatmapYAxis, PlotLayout, ScatterAxes, ScatterPlot,
    ScatterType, ScatterYAxis, Subplot, WeightedColor, blue_shades, green_shades, rgb,
};
use super::registry::EventDescriptor;
use super::{LayoutSpec, Payload, PlotDescriptor, Tick};
use crate::services::sources::{alloc, executor, probe, process};

/// Event series of host marks, drawn as vertical lines on scatter plots.
pub const EVENT_LAST_MARK: &str = "lastmark";

const BUILTIN_PLOT_IDS: &[&str] = &[
    "memory",
    "system-memory",
    "cpu",
    "disk-io",
    "threads",
    "runtime-tasks",
    "heap-live",
    "heap-alloc-rates",
    "size-classes",
    "sched-latencies",
    "sched-events",
];

/// Refresh period of heatmaps, in ticks.
const HEATMAP_UPDATE_FREQ: u32 = 5;

pub fn builtin_plot_ids() -> &'static [&'static str] {
    BUILTIN_PLOT_IDS
}

/// Whether `name` collides with a built-in plot, an event series or a
/// reserved key of the data message.
pub fn is_reserved_plot_name(name: &str) -> bool {
    name == "timestamp" || name == EVENT_LAST_MARK || BUILTIN_PLOT_IDS.contains(&name)
}

pub(crate) fn builtin_events() -> Vec<EventDescriptor> {
    vec![EventDescriptor::new(EVENT_LAST_MARK, probe::LAST_MARK)]
}

pub(crate) fn builtin_descriptors() -> Vec<PlotDescriptor> {
    vec![
        memory(),
        system_memory(),
        cpu(),
        disk_io(),
        threads(),
        runtime_tasks(),
        heap_live(),
        heap_alloc_rates(),
        size_classes(),
        sched_latencies(),
        sched_events(),
    ]
}

fn scatter(title: &str, y_title: &str, subplots: Vec<Subplot>, info_text: &str) -> ScatterPlot {
    ScatterPlot {
        title: title.to_string(),
        horz_events: EVENT_LAST_MARK.to_string(),
        layout: ScatterAxes {
            yaxis: ScatterYAxis {
                title: y_title.to_string(),
                ticksuffix: String::new(),
            },
            barmode: String::new(),
        },
        subplots,
        info_text: info_text.to_string(),
        ..ScatterPlot::default()
    }
}

fn memory() -> PlotDescriptor {
    let mut plot = scatter(
        "Process Memory",
        "bytes",
        vec![
            Subplot::new("resident", "%{y:.4s}B"),
            Subplot::new("virtual", "%{y:.4s}B"),
        ],
        "<i>Resident</i> is <b>/process/memory/resident:bytes</b>, the physical memory \
         mapped by the process.\n\
         <i>Virtual</i> is <b>/process/memory/virtual:bytes</b>, the whole reserved \
         address space.",
    );
    plot.layout.yaxis.ticksuffix = "B".to_string();
    PlotDescriptor::new(
        "memory",
        &[process::RESIDENT_BYTES, process::VIRTUAL_BYTES],
        LayoutSpec::Static(PlotLayout::Scatter(plot)),
        |tick: &Tick<'_>, _| Payload::Uint64(vec![tick.uint64(0), tick.uint64(1)]),
    )
}

fn system_memory() -> PlotDescriptor {
    let mut plot = scatter(
        "System Memory",
        "bytes",
        vec![
            Subplot::new("used", "%{y:.4s}B").stacked("one"),
            Subplot::new("available", "%{y:.4s}B").stacked("one"),
        ],
        "Stacked view of <b>/system/memory/total:bytes</b>, split into memory in use \
         and <b>/system/memory/available:bytes</b>.",
    );
    plot.layout.yaxis.ticksuffix = "B".to_string();
    PlotDescriptor::new(
        "system-memory",
        &[process::SYSTEM_AVAILABLE_BYTES, process::SYSTEM_TOTAL_BYTES],
        LayoutSpec::Static(PlotLayout::Scatter(plot)),
        |tick: &Tick<'_>, _| {
            let available = tick.uint64(0);
            let total = tick.uint64(1);
            Payload::Uint64(vec![total.saturating_sub(available), available])
        },
    )
}

fn cpu() -> PlotDescriptor {
    let usage = Subplot::new("usage", "%{y:.2f}%").colored(rgb(66, 133, 244));
    let mut plot = scatter(
        "CPU Usage",
        "cpu",
        vec![usage],
        "<b>/process/cpu/usage:percent</b> since the previous read. \
         A fully used core counts as 100%.",
    );
    plot.layout.yaxis.ticksuffix = "%".to_string();
    PlotDescriptor::new(
        "cpu",
        &[process::CPU_USAGE_PERCENT],
        LayoutSpec::Static(PlotLayout::Scatter(plot)),
        |tick: &Tick<'_>, _| Payload::Float64(vec![tick.float64(0)]),
    )
}

fn disk_io() -> PlotDescriptor {
    let mut plot = scatter(
        "Disk I/O",
        "bytes / second",
        vec![
            Subplot::new("read/sec", "%{y:.4s}B"),
            Subplot::new("written/sec", "%{y:.4s}B"),
        ],
        "Rates derived by differencing the cumulative <b>/process/disk/read:bytes</b> \
         and <b>/process/disk/written:bytes</b> counters.",
    );
    plot.layout.yaxis.ticksuffix = "B".to_string();
    PlotDescriptor::new(
        "disk-io",
        &[process::DISK_READ_BYTES, process::DISK_WRITTEN_BYTES],
        LayoutSpec::Static(PlotLayout::Scatter(plot)),
        |tick: &Tick<'_>, state| {
            let current = [tick.uint64(0) as f64, tick.uint64(1) as f64];
            Payload::Float64(state.rates(tick.now(), &current))
        },
    )
}

fn threads() -> PlotDescriptor {
    let plot = scatter(
        "OS Threads",
        "threads",
        vec![Subplot::new("threads", "%{y}")],
        "Live threads of the process, from <b>/process/threads:threads</b>.",
    );
    PlotDescriptor::new(
        "threads",
        &[process::THREADS],
        LayoutSpec::Static(PlotLayout::Scatter(plot)),
        |tick: &Tick<'_>, _| Payload::Uint64(vec![tick.uint64(0)]),
    )
}

fn runtime_tasks() -> PlotDescriptor {
    let plot = scatter(
        "Async Runtime",
        "tasks",
        vec![
            Subplot::new("alive tasks", "%{y}"),
            Subplot::new("global queue", "%{y}"),
            Subplot::new("workers", "%{y}"),
        ],
        "<i>Alive tasks</i> is <b>/runtime/tasks/alive:tasks</b>, spawned tasks not yet \
         completed.\n\
         <i>Global queue</i> is <b>/runtime/queue/global-depth:tasks</b>, tasks waiting to \
         be picked up by a worker.",
    );
    PlotDescriptor::new(
        "runtime-tasks",
        &[
            executor::ALIVE_TASKS,
            executor::GLOBAL_QUEUE_DEPTH,
            executor::WORKERS,
        ],
        LayoutSpec::Static(PlotLayout::Scatter(plot)),
        |tick: &Tick<'_>, _| {
            Payload::Uint64(vec![tick.uint64(0), tick.uint64(1), tick.uint64(2)])
        },
    )
}

fn heap_live() -> PlotDescriptor {
    let live = Subplot::new("live bytes", "%{y:.4s}B").colored(rgb(135, 182, 218));
    let mut plot = scatter(
        "Live Bytes in Heap",
        "bytes",
        vec![live],
        "<b>/heap/allocs:bytes</b> minus <b>/heap/frees:bytes</b>.",
    );
    plot.kind = ScatterType::Bar;
    PlotDescriptor::new(
        "heap-live",
        &[alloc::ALLOCS_BYTES, alloc::FREES_BYTES],
        LayoutSpec::Static(PlotLayout::Scatter(plot)),
        |tick: &Tick<'_>, _| {
            let live = tick.uint64(0).saturating_sub(tick.uint64(1));
            Payload::Uint64(vec![live])
        },
    )
}

fn heap_alloc_rates() -> PlotDescriptor {
    let plot = scatter(
        "Heap Allocation & Free Rates",
        "objects / second",
        vec![
            Subplot::new("allocs/sec", "%{y:.4s}").colored(rgb(66, 133, 244)),
            Subplot::new("frees/sec", "%{y:.4s}").colored(rgb(219, 68, 55)),
        ],
        "<i>Allocations per second</i> is derived by differencing the cumulative \
         <b>/heap/allocs:objects</b> metric.\n\
         <i>Frees per second</i> is similarly derived from <b>/heap/frees:objects</b>.",
    );
    PlotDescriptor::new(
        "heap-alloc-rates",
        &[alloc::ALLOCS_OBJECTS, alloc::FREES_OBJECTS],
        LayoutSpec::Static(PlotLayout::Scatter(plot)),
        |tick: &Tick<'_>, state| {
            let current = [tick.uint64(0) as f64, tick.uint64(1) as f64];
            Payload::Float64(state.rates(tick.now(), &current))
        },
    )
}

/// Ticks for every `every`-th row of a heatmap, labelled with its bound.
fn array_ticks(title: &str, bounds: &[f64], every: usize) -> HeatmapYAxis {
    let (tickvals, ticktext) = bounds
        .iter()
        .enumerate()
        .filter(|(i, _)| i % every == 0)
        .map(|(i, bound)| (i as f64, *bound))
        .unzip();
    HeatmapYAxis {
        title: title.to_string(),
        tickmode: "array".to_string(),
        tickvals,
        ticktext,
    }
}

fn heatmap(
    title: &str,
    colorscale: Vec<WeightedColor>,
    bounds: Vec<f64>,
    yaxis: HeatmapYAxis,
    hover: HeatmapHover,
    info_text: &str,
) -> PlotLayout {
    PlotLayout::Heatmap(HeatmapPlot {
        title: title.to_string(),
        update_freq: HEATMAP_UPDATE_FREQ,
        layout: HeatmapAxes { yaxis },
        colorscale,
        buckets: bucket_positions(bounds.len()),
        custom_data: bounds,
        hover,
        info_text: info_text.to_string(),
        ..HeatmapPlot::default()
    })
}

fn assert_same_bucket_count(allocs: usize, frees: usize) {
    assert_eq!(
        allocs, frees,
        "different number of buckets in allocs and frees size classes histograms"
    );
}

fn size_classes() -> PlotDescriptor {
    PlotDescriptor::new(
        "size-classes",
        &[alloc::ALLOCS_BY_SIZE, alloc::FREES_BY_SIZE],
        LayoutSpec::Sampled(std::sync::Arc::new(|tick: &Tick<'_>| {
            let allocs = tick.histogram(0);
            let frees = tick.histogram(1);
            assert_same_bucket_count(allocs.buckets.len(), frees.buckets.len());

            let factor = downsample_factor(allocs.counts.len(), tick.max_buckets());
            let bounds = downsample_bounds(&allocs.buckets, factor);
            let yaxis = array_ticks("size class", &bounds, 4);
            heatmap(
                "Size Classes",
                blue_shades(),
                bounds,
                yaxis,
                HeatmapHover {
                    yname: "size class".to_string(),
                    yunit: "bytes".to_string(),
                    zname: "objects".to_string(),
                },
                "Live objects per power-of-two size class, from <b>/heap/allocs-by-size:bytes</b> \
                 and <b>/heap/frees-by-size:bytes</b>.",
            )
        })),
        |tick: &Tick<'_>, state| {
            let allocs = tick.histogram(0);
            let frees = tick.histogram(1);
            assert_same_bucket_count(allocs.counts.len(), frees.counts.len());
            let live: Vec<u64> = allocs
                .counts
                .iter()
                .zip(&frees.counts)
                .map(|(a, f)| a.saturating_sub(*f))
                .collect();
            let factor = state.downsample_factor(live.len(), tick.max_buckets());
            Payload::Uint64(downsample_counts(&live, factor))
        },
    )
}

fn sched_latencies() -> PlotDescriptor {
    PlotDescriptor::new(
        "sched-latencies",
        &[probe::SCHED_LATENCIES],
        LayoutSpec::Sampled(std::sync::Arc::new(|tick: &Tick<'_>| {
            let histogram = tick.histogram(0);
            let factor = downsample_factor(histogram.counts.len(), tick.max_buckets());
            let bounds = downsample_bounds(&histogram.buckets, factor);
            let yaxis = array_ticks("duration", &bounds, 8);
            heatmap(
                "Scheduling Latency",
                green_shades(),
                bounds,
                yaxis,
                HeatmapHover {
                    yname: "duration".to_string(),
                    yunit: "duration".to_string(),
                    zname: "wake-ups".to_string(),
                },
                "Distribution of <b>/sched/latencies:seconds</b>: how late a timer task ran \
                 compared to its deadline, a proxy for time spent waiting for a worker.",
            )
        })),
        |tick: &Tick<'_>, state| {
            let max_buckets = tick.max_buckets();
            Payload::Uint64(state.downsample(tick.histogram(0), max_buckets).to_vec())
        },
    )
}

fn sched_events() -> PlotDescriptor {
    let plot = scatter(
        "Scheduling Events",
        "events",
        vec![
            Subplot::new("events per unit of time", "%{y}"),
            Subplot::new("events per unit of time, per worker", "%{y}"),
        ],
        "<i>Events per unit of time</i> is the growth of the sum of all buckets in \
         <b>/sched/latencies:seconds</b> since the previous tick.\n\
         <i>Per worker</i> divides it by the runtime worker count, from \
         <b>/runtime/workers:threads</b>.",
    );
    PlotDescriptor::new(
        "sched-events",
        &[probe::SCHED_LATENCIES, executor::WORKERS],
        LayoutSpec::Static(PlotLayout::Scatter(plot)),
        |tick: &Tick<'_>, state| {
            let events = state.delta(0, tick.histogram(0).total()) as f64;
            let workers = tick.uint64(1).max(1) as f64;
            Payload::Float64(vec![events, events / workers])
        },
    )
}
