// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Queue and stage statistics.
//!
//! Losses in the media path (rollback rejections, evictions, decode failures,
//! units dropped while a decoder is not configured) are never surfaced as
//! errors. They are counted here and read by logs, tests and metrics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters of a single [`TimestampQueue`](crate::queue::TimestampQueue).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Every push call, accepted or not
    pub push_all: u64,
    pub push_success: u64,
    /// Pushes rejected as rollback
    pub push_failed: u64,
    /// Units dropped by the high-water eviction
    pub evicted: u64,
    /// Every pop call, whatever the discipline
    pub pop_all: u64,
    pub pop_normal: u64,
    pub pop_tail: u64,
    pub pop_nothing: u64,
    /// Times rollback tracking was reset (marker or forced)
    pub resets: u64,
}

/// Snapshot of a stage's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    /// Units popped from the input queue
    pub received: u64,
    /// Frames handed to subscribers (one per subscriber per frame)
    pub sent: u64,
    /// Units dropped because the stage was not ready
    pub discarded: u64,
    /// Decode or resample failures that didn't stop the stage
    pub errored: u64,
    /// Successful (re)configurations
    pub configured: u64,
}

/// Lock-free counters written by a stage's worker and read from anywhere.
#[derive(Debug, Default)]
pub struct StageCounters {
    received: AtomicU64,
    sent: AtomicU64,
    discarded: AtomicU64,
    errored: AtomicU64,
    configured: AtomicU64,
    ready: AtomicBool,
}

impl StageCounters {
    #[inline]
    pub fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn errored(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn configured(&self) {
        self.configured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StageStats {
        StageStats {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            configured: self.configured.load(Ordering::Relaxed),
        }
    }
}
