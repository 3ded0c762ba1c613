//! Session counters for diagnostics.
//!
//! Lossy paths in the capture pipeline (queue full, pool dry, classifier
//! screens) drop frames without logging, so the counters are the only way
//! to see them. All counters are relaxed atomics; the RX callback bumps
//! them from driver context while the worker reads snapshots.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for one acquisition session. Reset at session start.
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_seen: AtomicUsize,
    frames_enqueued: AtomicUsize,
    drops_queue_full: AtomicUsize,
    drops_pool_exhausted: AtomicUsize,
    drops_oversize: AtomicUsize,
    classify_rejects: AtomicUsize,
    channel_hops: AtomicUsize,
    hops_vetoed: AtomicUsize,
    locks: AtomicUsize,
    lock_timeouts: AtomicUsize,
    crc_failures: AtomicUsize,
}

impl SessionStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame reached the RX callback.
    pub fn record_frame_seen(&self) {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame copy made it onto the event queue.
    pub fn record_frame_enqueued(&self) {
        self.frames_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame was dropped because the event queue was full.
    pub fn record_drop_queue_full(&self) {
        self.drops_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame was dropped because no pool buffer was free.
    pub fn record_drop_pool_exhausted(&self) {
        self.drops_pool_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame was dropped because it exceeded the pool buffer size.
    pub fn record_drop_oversize(&self) {
        self.drops_oversize.fetch_add(1, Ordering::Relaxed);
    }

    /// The classifier screened out a descriptor.
    pub fn record_classify_reject(&self) {
        self.classify_rejects.fetch_add(1, Ordering::Relaxed);
    }

    /// The radio moved to the next plan channel.
    pub fn record_channel_hop(&self) {
        self.channel_hops.fetch_add(1, Ordering::Relaxed);
    }

    /// A sub-protocol refused a hop.
    pub fn record_hop_vetoed(&self) {
        self.hops_vetoed.fetch_add(1, Ordering::Relaxed);
    }

    /// A sub-protocol synced and locked the channel.
    pub fn record_lock(&self) {
        self.locks.fetch_add(1, Ordering::Relaxed);
    }

    /// A channel lock expired without completing.
    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A payload integrity check failed.
    pub fn record_crc_failure(&self) {
        self.crc_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            drops_queue_full: self.drops_queue_full.load(Ordering::Relaxed),
            drops_pool_exhausted: self.drops_pool_exhausted.load(Ordering::Relaxed),
            drops_oversize: self.drops_oversize.load(Ordering::Relaxed),
            classify_rejects: self.classify_rejects.load(Ordering::Relaxed),
            channel_hops: self.channel_hops.load(Ordering::Relaxed),
            hops_vetoed: self.hops_vetoed.load(Ordering::Relaxed),
            locks: self.locks.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            crc_failures: self.crc_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`SessionStats`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub frames_seen: usize,
    pub frames_enqueued: usize,
    pub drops_queue_full: usize,
    pub drops_pool_exhausted: usize,
    pub drops_oversize: usize,
    pub classify_rejects: usize,
    pub channel_hops: usize,
    pub hops_vetoed: usize,
    pub locks: usize,
    pub lock_timeouts: usize,
    pub crc_failures: usize,
}

impl StatsSnapshot {
    /// Total frames dropped before reaching the worker.
    pub fn total_drops(&self) -> usize {
        self.drops_queue_full + self.drops_pool_exhausted + self.drops_oversize
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seen={} enqueued={} dropped={} rejected={} hops={} vetoed={} locks={} timeouts={} crc_failures={}",
            self.frames_seen,
            self.frames_enqueued,
            self.total_drops(),
            self.classify_rejects,
            self.channel_hops,
            self.hops_vetoed,
            self.locks,
            self.lock_timeouts,
            self.crc_failures,
        )
    }
}
