/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Heap statistics gathered by a counting [`GlobalAlloc`] wrapper.
//!
//! Install [`TrackingAllocator`] as the `#[global_allocator]` of the host
//! binary. When it is not installed, [`AllocatorSource`] describes no
//! metrics and every heap plot is disabled.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use statscope_core::{MetricDescription, MetricSource, SampleValue};

pub const ALLOCS_BYTES: &str = "/heap/allocs:bytes";
pub const FREES_BYTES: &str = "/heap/frees:bytes";
pub const ALLOCS_OBJECTS: &str = "/heap/allocs:objects";
pub const FREES_OBJECTS: &str = "/heap/frees:objects";
pub const ALLOCS_BY_SIZE: &str = "/heap/allocs-by-size:bytes";
pub const FREES_BY_SIZE: &str = "/heap/frees-by-size:bytes";

/// Power-of-two size classes: `[0, 1)`, `[1, 2)`, ..., `[2^31, +Inf)`.
pub const SIZE_CLASSES: usize = 33;

/// Cumulative allocation counters. All updates are relaxed atomics so the
/// allocator path never blocks.
pub struct AllocStats {
    active: AtomicBool,
    alloc_bytes: AtomicU64,
    free_bytes: AtomicU64,
    alloc_objects: AtomicU64,
    free_objects: AtomicU64,
    allocs_by_size: [AtomicU64; SIZE_CLASSES],
    frees_by_size: [AtomicU64; SIZE_CLASSES],
}

impl AllocStats {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            alloc_bytes: AtomicU64::new(0),
            free_bytes: AtomicU64::new(0),
            alloc_objects: AtomicU64::new(0),
            free_objects: AtomicU64::new(0),
            allocs_by_size: [const { AtomicU64::new(0) }; SIZE_CLASSES],
            frees_by_size: [const { AtomicU64::new(0) }; SIZE_CLASSES],
        }
    }

    pub fn record_alloc(&self, size: usize) {
        self.active.store(true, Ordering::Relaxed);
        self.alloc_bytes.fetch_add(size as u64, Ordering::Relaxed);
        self.alloc_objects.fetch_add(1, Ordering::Relaxed);
        let class = size_class(size);
        self.allocs_by_size[class].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_free(&self, size: usize) {
        self.free_bytes.fetch_add(size as u64, Ordering::Relaxed);
        self.free_objects.fetch_add(1, Ordering::Relaxed);
        let class = size_class(size);
        self.frees_by_size[class].fetch_add(1, Ordering::Relaxed);
    }

    /// Whether any allocation was ever recorded.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

impl Default for AllocStats {
    fn default() -> Self {
        Self::new()
    }
}

fn size_class(size: usize) -> usize {
    let class = (usize::BITS - size.leading_zeros()) as usize;
    class.min(SIZE_CLASSES - 1)
}

/// Bucket boundaries matching [`size_class`].
pub fn size_class_bounds() -> Vec<f64> {
    let mut bounds = Vec::with_capacity(SIZE_CLASSES + 1);
    bounds.push(0.0);
    bounds.extend((0..SIZE_CLASSES as i32 - 1).map(|exp| 2f64.powi(exp)));
    bounds.push(f64::INFINITY);
    bounds
}

static STATS: AllocStats = AllocStats::new();

/// Counting wrapper around another global allocator.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: TrackingAllocator = TrackingAllocator::new(std::alloc::System);
/// ```
pub struct TrackingAllocator<A = System> {
    inner: A,
}

impl<A> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc(layout) };
        if !ptr.is_null() {
            STATS.record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        if !ptr.is_null() {
            STATS.record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.inner.dealloc(ptr, layout) };
        STATS.record_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let moved = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !moved.is_null() {
            STATS.record_free(layout.size());
            STATS.record_alloc(new_size);
        }
        moved
    }
}

/// Exposes [`AllocStats`] as metrics.
pub struct AllocatorSource {
    stats: &'static AllocStats,
    bounds: Vec<f64>,
}

impl AllocatorSource {
    /// Reads the counters of the installed [`TrackingAllocator`].
    pub fn new() -> Self {
        Self::with_stats(&STATS)
    }

    pub fn with_stats(stats: &'static AllocStats) -> Self {
        Self {
            stats,
            bounds: size_class_bounds(),
        }
    }
}

impl Default for AllocatorSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for AllocatorSource {
    fn describe(&self) -> Vec<MetricDescription> {
        if !self.stats.is_active() {
            log::debug!("alloc source: no tracking allocator, heap metrics disabled");
            return Vec::new();
        }
        vec![
            MetricDescription::counter(ALLOCS_BYTES, "Cumulative bytes allocated on the heap."),
            MetricDescription::counter(FREES_BYTES, "Cumulative bytes freed."),
            MetricDescription::counter(ALLOCS_OBJECTS, "Cumulative heap allocations."),
            MetricDescription::counter(FREES_OBJECTS, "Cumulative heap frees."),
            MetricDescription::histogram(ALLOCS_BY_SIZE, "Allocations by size class."),
            MetricDescription::histogram(FREES_BY_SIZE, "Frees by size class."),
        ]
    }

    fn read(&self, out: &mut [SampleValue]) {
        if out.is_empty() {
            return;
        }
        let stats = self.stats;
        out[0] = SampleValue::Uint64(stats.alloc_bytes.load(Ordering::Relaxed));
        out[1] = SampleValue::Uint64(stats.free_bytes.load(Ordering::Relaxed));
        out[2] = SampleValue::Uint64(stats.alloc_objects.load(Ordering::Relaxed));
        out[3] = SampleValue::Uint64(stats.free_objects.load(Ordering::Relaxed));
        out[4].set_histogram(&self.bounds, load_all(&stats.allocs_by_size));
        out[5].set_histogram(&self.bounds, load_all(&stats.frees_by_size));
    }
}

fn load_all(cells: &[AtomicU64]) -> impl Iterator<Item = u64> + '_ {
    cells.iter().map(|cell| cell.load(Ordering::Relaxed))
}
