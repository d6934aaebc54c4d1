/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Demo host: instruments itself and serves its own metrics.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use bpaf::Bpaf;
use statscope::services::sources::{
    AllocatorSource, Probe, ProcessSource, RuntimeSource, TrackingAllocator,
};
use statscope::{
    CompositeSource, SchedLatencyProbe, Server, ServerOptions, TimeSeries, TimeSeriesBuilder,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator::new(std::alloc::System);

/// Serve live process metrics over WebSocket.
#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
struct Cli {
    /// Address to listen on
    #[bpaf(long, argument("ADDR"))]
    addr: Option<SocketAddr>,
    /// Path prefix of the endpoint, which is served at <ROOT>/ws
    #[bpaf(long, argument("ROOT"))]
    root: Option<String>,
    /// Default period between two data messages, in milliseconds
    #[bpaf(long("interval-ms"), argument("MS"))]
    interval_ms: Option<u64>,
    /// TOML file with server options; flags override its values
    #[bpaf(long, argument("FILE"))]
    config: Option<PathBuf>,
}

impl Cli {
    fn options(&self) -> Result<ServerOptions, statscope::runtime::OptionsError> {
        let mut options = match &self.config {
            Some(path) => ServerOptions::load(path)?,
            None => ServerOptions::default(),
        };
        if let Some(addr) = self.addr {
            options.addr = addr;
        }
        if let Some(root) = &self.root {
            options.root = root.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            options.interval_ms = interval_ms;
        }
        Ok(options)
    }
}

fn main() -> ExitCode {
    let cli = cli().run();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = match cli.options() {
        Ok(options) => options,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    let runtime = match builder.enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("cannot start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(options)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(options: ServerOptions) -> Result<(), Box<dyn std::error::Error>> {
    let probe = Probe::new();
    let sched = SchedLatencyProbe::install(&probe, options.sched_probe_period())?;
    let requests = probe.counter("/demo/ticks:ticks", "Iterations of the demo workload.")?;

    let source = CompositeSource::new()
        .with(Arc::new(ProcessSource::new()?))
        .with(Arc::new(RuntimeSource::current()))
        .with(Arc::new(AllocatorSource::new()))
        .with(Arc::new(probe.clone()));

    let workload = requests.clone();
    let demo_plot = TimeSeriesBuilder::new("demo-workload")
        .title("Demo Workload")
        .y_axis_title("ticks")
        .tooltip("Total iterations of the demo workload since start.")
        .add_series(TimeSeries::new("ticks"), move || workload.get() as f64)
        .build()?;

    let server = Server::builder(Arc::new(source))
        .with_options(&options)
        .user_plot(demo_plot)
        .build()?;

    let cancel = CancellationToken::new();
    let sched_task = sched.spawn(cancel.child_token());
    let workload_task = tokio::spawn(demo_workload(probe, requests, cancel.child_token()));

    let listener = tokio::net::TcpListener::bind(options.addr).await?;
    let serve = statscope::serve(listener, server.clone(), cancel.child_token());
    let serving = tokio::spawn(serve);

    tokio::signal::ctrl_c().await?;
    log::info!("main: shutting down");
    cancel.cancel();
    server.shutdown().await;
    let _ = tokio::join!(sched_task, workload_task);
    serving.await??;
    Ok(())
}

/// Allocates a little and marks an event every few seconds, so every plot
/// has something to show.
async fn demo_workload(
    probe: Probe,
    ticks: statscope::services::sources::Counter,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    let mut retained: Vec<Vec<u8>> = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        ticks.incr();
        retained.push(vec![0; 64usize << (ticks.get() % 10)]);
        if ticks.get() % 50 == 0 {
            retained.clear();
            probe.mark();
        }
    }
}
