/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use statscope_core::{MetricDescription, MetricSource, SampleValue};
use tokio::runtime::Handle;

pub const WORKERS: &str = "/runtime/workers:threads";
pub const ALIVE_TASKS: &str = "/runtime/tasks/alive:tasks";
pub const GLOBAL_QUEUE_DEPTH: &str = "/runtime/queue/global-depth:tasks";

/// Scheduler statistics of a tokio runtime.
pub struct RuntimeSource {
    handle: Handle,
}

impl RuntimeSource {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Observes the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl MetricSource for RuntimeSource {
    fn describe(&self) -> Vec<MetricDescription> {
        vec![
            MetricDescription::gauge(WORKERS, "Worker threads of the runtime."),
            MetricDescription::gauge(ALIVE_TASKS, "Tasks spawned and not yet completed."),
            MetricDescription::gauge(
                GLOBAL_QUEUE_DEPTH,
                "Tasks waiting in the runtime's global injection queue.",
            ),
        ]
    }

    fn read(&self, out: &mut [SampleValue]) {
        let metrics = self.handle.metrics();
        out[0] = SampleValue::Uint64(metrics.num_workers() as u64);
        out[1] = SampleValue::Uint64(metrics.num_alive_tasks() as u64);
        out[2] = SampleValue::Uint64(metrics.global_queue_depth() as u64);
    }
}
