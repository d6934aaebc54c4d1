/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The server instance: catalog, shared sample buffer, plot registry and
//! live connections.
//!
//! Nothing here is process-global. Two servers in one process share no
//! state, which keeps tests independent.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use statscope_core::{CatalogError, MAX_BUCKETS, MetricCatalog, MetricSource, SampleBuffer};

use super::broadcaster;
use super::connections::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use super::options::ServerOptions;
use super::sink::SnapshotSink;
use crate::registries::plot::{
    Config, DescriptorState, PlotDescriptor, PlotRegistry, Registry, RegistryError, Snapshot,
    UserPlot,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerConfigError {
    NonPositiveInterval,
    ZeroMaxBuckets,
    Registry(RegistryError),
    Catalog(CatalogError),
}

impl std::fmt::Display for ServerConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveInterval => write!(f, "send interval must be positive"),
            Self::ZeroMaxBuckets => write!(f, "maximum heatmap bucket count must be positive"),
            Self::Registry(err) => write!(f, "invalid plot registration: {err}"),
            Self::Catalog(err) => write!(f, "metric catalog unavailable: {err}"),
        }
    }
}

impl std::error::Error for ServerConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Registry(err) => Some(err),
            Self::Catalog(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RegistryError> for ServerConfigError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl From<CatalogError> for ServerConfigError {
    fn from(err: CatalogError) -> Self {
        Self::Catalog(err)
    }
}

pub struct ServerBuilder {
    source: Arc<dyn MetricSource>,
    root: String,
    interval: Duration,
    max_buckets: usize,
    write_timeout: Duration,
    builtins: bool,
    user_plots: Vec<UserPlot>,
    descriptors: Vec<PlotDescriptor>,
}

impl ServerBuilder {
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        let defaults = ServerOptions::default();
        Self {
            source,
            interval: defaults.interval(),
            write_timeout: defaults.write_timeout(),
            root: defaults.root,
            max_buckets: MAX_BUCKETS,
            builtins: true,
            user_plots: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: &ServerOptions) -> Self {
        self.root = options.root.clone();
        self.interval = options.interval();
        self.max_buckets = options.max_buckets;
        self.write_timeout = options.write_timeout();
        self
    }

    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Default period between two data messages of a connection.
    pub fn send_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Leaves the built-in plots out; only user plots and descriptors added
    /// through [`Self::descriptor`] are served.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    pub fn user_plot(mut self, plot: UserPlot) -> Self {
        self.user_plots.push(plot);
        self
    }

    /// Adds a plot descriptor reading catalog metrics directly.
    pub fn descriptor(mut self, descriptor: PlotDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn build(self) -> Result<Server, ServerConfigError> {
        if self.interval.is_zero() {
            return Err(ServerConfigError::NonPositiveInterval);
        }
        if self.max_buckets == 0 {
            return Err(ServerConfigError::ZeroMaxBuckets);
        }

        let mut registry = if self.builtins {
            PlotRegistry::with_builtins()
        } else {
            PlotRegistry::new()
        };
        for descriptor in self.descriptors {
            registry.register(descriptor)?;
        }
        for plot in self.user_plots {
            registry.register(plot.into_descriptor())?;
        }

        let catalog = MetricCatalog::enumerate(self.source)?;
        let buffer = catalog.new_buffer();
        log::info!(
            "server: {} metrics, {} plots registered, root {}",
            catalog.len(),
            registry.len(),
            self.root
        );

        Ok(Server {
            shared: Arc::new(Shared {
                root: self.root,
                interval: self.interval,
                max_buckets: self.max_buckets,
                write_timeout: self.write_timeout,
                catalog,
                buffer: Mutex::new(buffer),
                pending: Mutex::new(Some(registry)),
                registry: OnceLock::new(),
                connections: ConnectionRegistry::new(),
            }),
        })
    }
}

struct Shared {
    root: String,
    interval: Duration,
    max_buckets: usize,
    write_timeout: Duration,
    catalog: MetricCatalog,
    /// Refreshed and read as one critical section per tick.
    buffer: Mutex<SampleBuffer>,
    pending: Mutex<Option<PlotRegistry>>,
    registry: OnceLock<Registry>,
    connections: ConnectionRegistry,
}

/// Cheap to clone; clones refer to the same server.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("root", &self.shared.root)
            .field("interval", &self.shared.interval)
            .field("catalog", &self.shared.catalog)
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn builder(source: Arc<dyn MetricSource>) -> ServerBuilder {
        ServerBuilder::new(source)
    }

    pub fn root(&self) -> &str {
        &self.shared.root
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn write_timeout(&self) -> Duration {
        self.shared.write_timeout
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.shared.catalog
    }

    /// The built registry. The first call refreshes the sample buffer once
    /// and builds the registry from it; concurrent first callers wait for
    /// that single build and all observe its result.
    pub fn registry(&self) -> &Registry {
        self.shared.registry.get_or_init(|| {
            let pending = self.shared.pending.lock().take().unwrap_or_default();
            let mut buffer = self.shared.buffer.lock();
            self.shared.catalog.refresh(&mut buffer);
            pending.build(&self.shared.catalog, &buffer, self.shared.max_buckets)
        })
    }

    pub fn config(&self) -> &Config {
        self.registry().config()
    }

    /// Refreshes the shared buffer and extracts one snapshot, holding the
    /// buffer lock throughout so the snapshot is never torn.
    pub fn tick(&self, states: &mut [DescriptorState]) -> Snapshot {
        let registry = self.registry();
        let mut buffer = self.shared.buffer.lock();
        self.shared.catalog.refresh(&mut buffer);
        registry.snapshot(&buffer, states)
    }

    /// Number of times the shared buffer was refreshed.
    pub fn reads(&self) -> u64 {
        self.shared.buffer.lock().reads()
    }

    /// Starts streaming to `sink`: the config first, then one data message
    /// every `frequency` (the server interval when `None` or zero).
    ///
    /// # Panics
    ///
    /// Outside of a tokio runtime.
    pub fn register_connection<S: SnapshotSink>(
        &self,
        sink: S,
        frequency: Option<Duration>,
    ) -> ConnectionHandle {
        let frequency = match frequency {
            Some(frequency) if !frequency.is_zero() => frequency,
            Some(_) => {
                log::warn!(
                    "server: zero connection frequency, using {:?}",
                    self.shared.interval
                );
                self.shared.interval
            }
            None => self.shared.interval,
        };
        let server = self.clone();
        self.shared.connections.register(frequency, move |id, cancel| {
            broadcaster::run(server, id, sink, frequency, cancel)
        })
    }

    /// Closes one connection. Returns `false` if it was already closed.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.shared.connections.unregister(id)
    }

    pub fn connection_frequency(&self, id: ConnectionId) -> Option<Duration> {
        self.shared.connections.frequency(id)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Closes every connection and waits for their tasks to end.
    pub async fn shutdown(&self) {
        self.shared.connections.shutdown().await
    }
}
