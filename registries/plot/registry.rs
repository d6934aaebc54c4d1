/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Pending plot registrations and the immutable registry built from them.
//!
//! [`PlotRegistry`] collects descriptors in registration order. Building it
//! against a [`MetricCatalog`] resolves every required metric to a slot,
//! disables descriptors with missing metrics and computes the layouts that
//! need real sample values. The resulting [`Registry`] is shared read-only
//! between connections.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use statscope_core::{MetricCatalog, SampleBuffer};

use super::builtin::{builtin_descriptors, builtin_events};
use super::layout::PlotLayout;
use super::{DescriptorState, ExtractFn, LayoutSpec, Payload, PlotDescriptor, Tick};

/// Data message key holding the snapshot time; no plot may use it.
const TIMESTAMP_KEY: &str = "timestamp";

/// A marker series drawn as vertical lines on other plots.
///
/// The metric is a gauge holding a Unix time in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub(crate) name: String,
    pub(crate) metric: String,
}

impl EventDescriptor {
    pub fn new(name: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicatePlotId(String),
    /// The id is used by an event series or by the data message itself.
    ReservedPlotId(String),
    DuplicateEvent(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicatePlotId(id) => write!(f, "plot id {id:?} is already registered"),
            Self::ReservedPlotId(id) => write!(f, "plot id {id:?} is reserved"),
            Self::DuplicateEvent(name) => write!(f, "event {name:?} is already registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Layouts of every enabled plot, sent once as the first message of each
/// connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub events: Vec<String>,
    pub series: Vec<PlotLayout>,
}

#[derive(Debug, Default)]
pub struct PlotRegistry {
    descriptors: Vec<PlotDescriptor>,
    events: Vec<EventDescriptor>,
}

impl PlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in plots and events.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for event in builtin_events() {
            registry.events.push(event);
        }
        for descriptor in builtin_descriptors() {
            registry.descriptors.push(descriptor);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Appends a descriptor. Ids must be unique across the registry.
    pub fn register(&mut self, descriptor: PlotDescriptor) -> Result<(), RegistryError> {
        if descriptor.id == TIMESTAMP_KEY
            || self.events.iter().any(|e| e.name == descriptor.id)
        {
            return Err(RegistryError::ReservedPlotId(descriptor.id));
        }
        if self.descriptors.iter().any(|d| d.id == descriptor.id) {
            return Err(RegistryError::DuplicatePlotId(descriptor.id));
        }
        log::debug!("plot registry: registered {}", descriptor.id);
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn register_event(&mut self, event: EventDescriptor) -> Result<(), RegistryError> {
        if self.events.iter().any(|e| e.name == event.name) {
            return Err(RegistryError::DuplicateEvent(event.name));
        }
        if event.name == TIMESTAMP_KEY || self.descriptors.iter().any(|d| d.id == event.name) {
            return Err(RegistryError::ReservedPlotId(event.name));
        }
        self.events.push(event);
        Ok(())
    }

    /// Resolves descriptors against `catalog` and computes every layout.
    ///
    /// `samples` must have been refreshed from `catalog` at least once:
    /// heatmap layouts take their axis labels from real bucket bounds.
    pub fn build(
        self,
        catalog: &MetricCatalog,
        samples: &SampleBuffer,
        max_buckets: usize,
    ) -> Registry {
        let mut events = Vec::with_capacity(self.events.len());
        for event in self.events {
            match catalog.slot(&event.metric) {
                Some(slot) => events.push(EnabledEvent {
                    name: event.name,
                    slot,
                }),
                None => log::info!(
                    "plot registry: event {} disabled, metric {} not exposed",
                    event.name,
                    event.metric
                ),
            }
        }

        let mut plots = Vec::with_capacity(self.descriptors.len());
        let mut series = Vec::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors {
            let slots: Option<Vec<usize>> = descriptor
                .required_metrics
                .iter()
                .map(|metric| catalog.slot(metric))
                .collect();
            let Some(slots) = slots else {
                let missing: Vec<&str> = descriptor
                    .required_metrics
                    .iter()
                    .filter(|metric| !catalog.contains(metric))
                    .map(String::as_str)
                    .collect();
                log::info!(
                    "plot registry: {} disabled, missing metrics {missing:?}",
                    descriptor.id
                );
                continue;
            };

            let mut layout = match descriptor.layout {
                LayoutSpec::Static(layout) => layout,
                LayoutSpec::Sampled(compute) => compute(&Tick::new(samples, &slots, max_buckets)),
            };
            layout.set_name(&descriptor.id);
            if !layout.horz_events().is_empty()
                && !events.iter().any(|e| e.name == layout.horz_events())
            {
                layout.clear_horz_events();
            }
            series.push(layout);
            plots.push(EnabledPlot {
                id: descriptor.id,
                slots,
                extract: descriptor.extract,
            });
        }

        log::debug!(
            "plot registry: built with {} enabled plots and {} events",
            plots.len(),
            events.len()
        );
        let config = Config {
            events: events.iter().map(|e| e.name.clone()).collect(),
            series,
        };
        Registry {
            plots,
            events,
            config,
            max_buckets,
        }
    }
}

struct EnabledPlot {
    id: String,
    slots: Vec<usize>,
    extract: ExtractFn,
}

struct EnabledEvent {
    name: String,
    slot: usize,
}

/// Enabled plots with their metric slots resolved. Immutable and shared by
/// every connection of a server.
pub struct Registry {
    plots: Vec<EnabledPlot>,
    events: Vec<EnabledEvent>,
    config: Config,
    max_buckets: usize,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plots: Vec<&str> = self.plots.iter().map(|p| p.id.as_str()).collect();
        f.debug_struct("Registry")
            .field("plots", &plots)
            .field("events", &self.config.events)
            .field("max_buckets", &self.max_buckets)
            .finish()
    }
}

impl Registry {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn plot_ids(&self) -> impl Iterator<Item = &str> {
        self.plots.iter().map(|plot| plot.id.as_str())
    }

    /// Fresh extraction state, one entry per enabled plot.
    pub fn new_states(&self) -> Vec<DescriptorState> {
        vec![DescriptorState::default(); self.plots.len()]
    }

    /// Runs every enabled plot's extraction over `samples`.
    ///
    /// The caller holds the buffer lock for the refresh and this call.
    ///
    /// # Panics
    ///
    /// If `states` was not created by [`Self::new_states`].
    pub fn snapshot(&self, samples: &SampleBuffer, states: &mut [DescriptorState]) -> Snapshot {
        assert_eq!(
            states.len(),
            self.plots.len(),
            "{} descriptor states for {} enabled plots",
            states.len(),
            self.plots.len()
        );

        let series = self
            .plots
            .iter()
            .zip(states.iter_mut())
            .map(|(plot, state)| {
                let tick = Tick::new(samples, &plot.slots, self.max_buckets);
                (plot.id.clone(), (plot.extract)(&tick, state))
            })
            .collect();

        let events = self
            .events
            .iter()
            .map(|event| {
                let marks = match samples.uint64(event.slot) {
                    0 => Vec::new(),
                    millis => vec![millis],
                };
                (event.name.clone(), marks)
            })
            .collect();

        Snapshot {
            timestamp: unix_millis(),
            series,
            events,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| since.as_millis() as u64)
}

/// Values of every enabled plot for one tick, keyed by plot id in
/// registration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp: u64,
    #[serde(serialize_with = "ordered_map")]
    pub series: Vec<(String, Payload)>,
    #[serde(serialize_with = "ordered_map")]
    pub events: Vec<(String, Vec<u64>)>,
}

impl Snapshot {
    pub fn get(&self, id: &str) -> Option<&Payload> {
        self.series
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, payload)| payload)
    }
}

fn ordered_map<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registries::plot::{ScatterPlot, Subplot};
    use statscope_core::{MetricDescription, MetricSource, SampleValue};
    use std::sync::Arc;

    struct Fixed(Vec<&'static str>);

    impl MetricSource for Fixed {
        fn describe(&self) -> Vec<MetricDescription> {
            let gauge = |name: &&str| MetricDescription::gauge(*name, "");
            self.0.iter().map(gauge).collect()
        }

        fn read(&self, out: &mut [SampleValue]) {
            for (i, value) in out.iter_mut().enumerate() {
                *value = SampleValue::Uint64(10 * (i as u64 + 1));
            }
        }
    }

    fn gauge_plot(id: &str, metrics: &[&str]) -> PlotDescriptor {
        let layout = PlotLayout::Scatter(ScatterPlot {
            horz_events: "marks".into(),
            subplots: metrics.iter().map(|m| Subplot::new(m, "%{y}")).collect(),
            ..ScatterPlot::default()
        });
        let count = metrics.len();
        PlotDescriptor::new(id, metrics, LayoutSpec::Static(layout), move |tick: &Tick<'_>, _| {
            Payload::Uint64((0..count).map(|i| tick.uint64(i)).collect())
        })
    }

    fn built(registry: PlotRegistry, metrics: Vec<&'static str>) -> (Registry, SampleBuffer) {
        let catalog = MetricCatalog::enumerate(Arc::new(Fixed(metrics))).unwrap();
        let mut buffer = catalog.new_buffer();
        catalog.refresh(&mut buffer);
        (registry.build(&catalog, &buffer, 100), buffer)
    }

    #[test]
    fn missing_metric_disables_only_that_plot() {
        let mut registry = PlotRegistry::new();
        registry.register(gauge_plot("a", &["/a:x"])).unwrap();
        let partial = gauge_plot("b", &["/a:x", "/missing:x"]);
        registry.register(partial).unwrap();
        registry.register(gauge_plot("c", &["/c:x"])).unwrap();

        let (registry, _) = built(registry, vec!["/a:x", "/c:x"]);
        let names: Vec<&str> = registry.config().series.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(registry.plot_ids().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn duplicate_and_reserved_ids_are_rejected() {
        let mut registry = PlotRegistry::new();
        let marks = EventDescriptor::new("marks", "/m:ms");
        registry.register_event(marks).unwrap();
        registry.register(gauge_plot("a", &[])).unwrap();

        assert_eq!(
            registry.register(gauge_plot("a", &[])),
            Err(RegistryError::DuplicatePlotId("a".into()))
        );
        assert_eq!(
            registry.register(gauge_plot("marks", &[])),
            Err(RegistryError::ReservedPlotId("marks".into()))
        );
        assert_eq!(
            registry.register(gauge_plot("timestamp", &[])),
            Err(RegistryError::ReservedPlotId("timestamp".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_keeps_registration_order_and_events() {
        let mut registry = PlotRegistry::new();
        let marks = EventDescriptor::new("marks", "/m:ms");
        registry.register_event(marks).unwrap();
        registry.register(gauge_plot("z", &["/b:x"])).unwrap();
        let both = gauge_plot("a", &["/a:x", "/b:x"]);
        registry.register(both).unwrap();

        let (registry, buffer) = built(registry, vec!["/m:ms", "/a:x", "/b:x"]);
        assert_eq!(registry.config().events, vec!["marks"]);

        let mut states = registry.new_states();
        let snapshot = registry.snapshot(&buffer, &mut states);
        assert_eq!(snapshot.get("a"), Some(&Payload::Uint64(vec![20, 30])));

        let json = serde_json::to_string(&snapshot).unwrap();
        let z = json.find("\"z\"").unwrap();
        let a = json.find("\"a\"").unwrap();
        assert!(z < a, "series out of order: {json}");
        assert!(json.contains("\"events\":{\"marks\":[10]}"));
    }

    #[test]
    fn disabled_event_is_cleared_from_layouts() {
        let mut registry = PlotRegistry::new();
        let marks = EventDescriptor::new("marks", "/m:ms");
        registry.register_event(marks).unwrap();
        registry.register(gauge_plot("a", &["/a:x"])).unwrap();

        let (registry, _) = built(registry, vec!["/a:x"]);
        assert!(registry.config().events.is_empty());
        assert_eq!(registry.config().series[0].horz_events(), "");
    }

    #[test]
    #[should_panic(expected = "descriptor states")]
    fn snapshot_rejects_foreign_states() {
        let mut registry = PlotRegistry::new();
        registry.register(gauge_plot("a", &["/a:x"])).unwrap();
        let (registry, buffer) = built(registry, vec!["/a:x"]);
        registry.snapshot(&buffer, &mut []);
    }
}
