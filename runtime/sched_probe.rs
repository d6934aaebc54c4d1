/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Scheduling latency probe.
//!
//! A background task sleeps for a fixed period and records how late it was
//! woken up. On a busy runtime the lateness grows with the time tasks wait
//! for a worker, which is what the `sched-latencies` heatmap shows.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::services::sources::probe::{SCHED_LATENCIES, sched_latency_bounds};
use crate::services::sources::{HistogramRecorder, Probe, ProbeError};

pub struct SchedLatencyProbe {
    recorder: HistogramRecorder,
    period: Duration,
}

impl SchedLatencyProbe {
    /// Registers [`SCHED_LATENCIES`] on `probe`. Must happen before the
    /// probe is handed to a server.
    pub fn install(probe: &Probe, period: Duration) -> Result<Self, ProbeError> {
        let recorder = probe.histogram(
            SCHED_LATENCIES,
            "Lateness of timer wake-ups on the async runtime.",
            sched_latency_bounds(),
        )?;
        Ok(Self { recorder, period })
    }

    pub fn recorder(&self) -> &HistogramRecorder {
        &self.recorder
    }

    /// Spawns the measuring task on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("sched_probe: cancelled");
                }
                _ = sched_latency_worker(self.recorder, self.period) => {}
            }
        });
        log::debug!("sched_probe: spawned");
        handle
    }
}

async fn sched_latency_worker(recorder: HistogramRecorder, period: Duration) {
    loop {
        let deadline = Instant::now() + period;
        tokio::time::sleep_until(deadline).await;
        let late = Instant::now().saturating_duration_since(deadline);
        recorder.record_duration(late);
    }
}
