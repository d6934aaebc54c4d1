/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Operating-system view of the current process, read through `sysinfo`.

use parking_lot::Mutex;
use statscope_core::{MetricDescription, MetricSource, SampleValue};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

pub const RESIDENT_BYTES: &str = "/process/memory/resident:bytes";
pub const VIRTUAL_BYTES: &str = "/process/memory/virtual:bytes";
pub const CPU_USAGE_PERCENT: &str = "/process/cpu/usage:percent";
pub const DISK_READ_BYTES: &str = "/process/disk/read:bytes";
pub const DISK_WRITTEN_BYTES: &str = "/process/disk/written:bytes";
pub const UPTIME_SECONDS: &str = "/process/uptime:seconds";
pub const THREADS: &str = "/process/threads:threads";
pub const SYSTEM_AVAILABLE_BYTES: &str = "/system/memory/available:bytes";
pub const SYSTEM_TOTAL_BYTES: &str = "/system/memory/total:bytes";

#[derive(Debug)]
pub enum ProcessSourceError {
    UnknownPid(&'static str),
}

impl std::fmt::Display for ProcessSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownPid(reason) => write!(f, "cannot resolve current pid: {reason}"),
        }
    }
}

impl std::error::Error for ProcessSourceError {}

/// Process and system memory, CPU and I/O counters.
///
/// The thread count is only exposed where the platform reports per-process
/// tasks; elsewhere the metric is absent and plots needing it are disabled.
pub struct ProcessSource {
    pid: Pid,
    system: Mutex<System>,
    with_threads: bool,
}

impl ProcessSource {
    pub fn new() -> Result<Self, ProcessSourceError> {
        let pid = sysinfo::get_current_pid().map_err(ProcessSourceError::UnknownPid)?;
        let mut system = System::new();
        refresh(&mut system, pid);
        let with_threads = system
            .process(pid)
            .and_then(|process| process.tasks())
            .is_some();
        log::debug!("process source: pid {pid}, thread count: {with_threads}");

        Ok(Self {
            pid,
            system: Mutex::new(system),
            with_threads,
        })
    }
}

fn refresh(system: &mut System, pid: Pid) {
    system.refresh_memory();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        false,
        ProcessRefreshKind::nothing()
            .with_memory()
            .with_cpu()
            .with_disk_usage()
            .with_tasks(),
    );
}

impl MetricSource for ProcessSource {
    fn describe(&self) -> Vec<MetricDescription> {
        let mut metrics = vec![
            MetricDescription::gauge(RESIDENT_BYTES, "Resident set size of the process."),
            MetricDescription::gauge(VIRTUAL_BYTES, "Virtual memory size of the process."),
            MetricDescription::gauge(
                CPU_USAGE_PERCENT,
                "CPU usage since the previous read, 100% per fully used core.",
            ),
            MetricDescription::counter(DISK_READ_BYTES, "Cumulative bytes read from disk."),
            MetricDescription::counter(DISK_WRITTEN_BYTES, "Cumulative bytes written to disk."),
            MetricDescription::gauge(UPTIME_SECONDS, "Seconds since the process started."),
            MetricDescription::gauge(SYSTEM_AVAILABLE_BYTES, "Memory available to new processes."),
            MetricDescription::gauge(SYSTEM_TOTAL_BYTES, "Total physical memory."),
        ];
        if self.with_threads {
            let threads = MetricDescription::gauge(THREADS, "Live threads of the process.");
            metrics.push(threads);
        }
        metrics
    }

    fn read(&self, out: &mut [SampleValue]) {
        let mut system = self.system.lock();
        refresh(&mut system, self.pid);

        let available = system.available_memory();
        let total = system.total_memory();
        let Some(process) = system.process(self.pid) else {
            log::warn!("process source: pid {} not reported by sysinfo", self.pid);
            write_unreported(out, available, total);
            return;
        };

        let disk = process.disk_usage();
        out[0] = SampleValue::Uint64(process.memory());
        out[1] = SampleValue::Uint64(process.virtual_memory());
        out[2] = SampleValue::Float64(f64::from(process.cpu_usage()));
        out[3] = SampleValue::Uint64(disk.total_read_bytes);
        out[4] = SampleValue::Uint64(disk.total_written_bytes);
        out[5] = SampleValue::Uint64(process.run_time());
        out[6] = SampleValue::Uint64(available);
        out[7] = SampleValue::Uint64(total);
        if self.with_threads {
            // The main thread is not listed among the tasks.
            let threads = process.tasks().map_or(0, |tasks| tasks.len() as u64 + 1);
            out[8] = SampleValue::Uint64(threads);
        }
    }
}

/// Fills the process slots when sysinfo momentarily misses the process.
/// Slots read before keep their values; unread ones become zero so every
/// slot holds a value of its kind.
fn write_unreported(out: &mut [SampleValue], available: u64, total: u64) {
    for (slot, value) in out.iter_mut().enumerate() {
        *value = match slot {
            6 => SampleValue::Uint64(available),
            7 => SampleValue::Uint64(total),
            _ if !matches!(value, SampleValue::Empty) => continue,
            2 => SampleValue::Float64(0.0),
            _ => SampleValue::Uint64(0),
        };
    }
}
