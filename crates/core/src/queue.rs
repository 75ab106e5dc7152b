// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Timestamp-keyed, bounded, thread-safe buffer of media units.
//!
//! A [`TimestampQueue`] stores units keyed by a 32-bit timestamp (last write
//! for a key wins) and offers three consumption disciplines:
//!
//! - [`pop`](TimestampQueue::pop): oldest key first, optionally blocking
//! - [`pop_tail_n`](TimestampQueue::pop_tail_n): skip backlog, take a recent unit
//! - [`pop_by_given_time_ref`](TimestampQueue::pop_by_given_time_ref): align to an
//!   external, possibly stalled, clock
//!
//! Backpressure is lossy: producers never block. When the queue reaches its
//! bound, the oldest units are evicted. A push whose key is older than the
//! previous push is rejected as rollback until either a clean-queue marker
//! arrives or `max_rollback_count` consecutive rejections force a reset.

use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{system_clock, Clock};
use crate::queue_config::{QueueConfig, MIN_MAX_SIZE};
use crate::stats::QueueStats;
use crate::types::{MediaFrame, MediaPacket};

/// Anything that can be stored in a [`TimestampQueue`].
pub trait QueueItem {
    /// A clean-queue marker resets rollback and time-reference tracking.
    fn is_clean_queue_marker(&self) -> bool {
        false
    }
}

impl QueueItem for MediaPacket {
    fn is_clean_queue_marker(&self) -> bool {
        self.meta.is_clean_queue_marker()
    }
}

impl QueueItem for MediaFrame {
    fn is_clean_queue_marker(&self) -> bool {
        self.meta.is_clean_queue_marker()
    }
}

impl<T: QueueItem + ?Sized> QueueItem for Arc<T> {
    fn is_clean_queue_marker(&self) -> bool {
        (**self).is_clean_queue_marker()
    }
}

impl<T: QueueItem + ?Sized> QueueItem for Box<T> {
    fn is_clean_queue_marker(&self) -> bool {
        (**self).is_clean_queue_marker()
    }
}

/// How long [`TimestampQueue::pop`] may wait for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopTimeout {
    NonBlocking,
    Forever,
    For(Duration),
}

impl PopTimeout {
    /// Maps the millisecond convention `0` = non-blocking, negative = forever,
    /// positive = bounded wait.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => Self::NonBlocking,
            m => u64::try_from(m).map_or(Self::Forever, |ms| Self::For(Duration::from_millis(ms))),
        }
    }
}

impl From<Duration> for PopTimeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Self::NonBlocking
        } else {
            Self::For(d)
        }
    }
}

/// Classification of a time-reference pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    /// A unit newer than the reference was found; older units were dropped.
    Normal,
    /// The most recent unit was taken and the queue emptied.
    Tail,
    /// Nothing to pop.
    Empty,
}

/// Result of [`TimestampQueue::pop_by_given_time_ref`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeRefPop<T> {
    Normal(T),
    Tail(T),
    Empty,
}

impl<T> TimeRefPop<T> {
    pub const fn outcome(&self) -> PopOutcome {
        match self {
            Self::Normal(_) => PopOutcome::Normal,
            Self::Tail(_) => PopOutcome::Tail,
            Self::Empty => PopOutcome::Empty,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Normal(v) | Self::Tail(v) => Some(v),
            Self::Empty => None,
        }
    }
}

struct Inner<T> {
    entries: BTreeMap<u32, T>,
    last_push_key: Option<u32>,
    rollback_count: u32,
    prev_pop_wall_clock: Option<u64>,
    prev_time_ref: u32,
    max_key: u32,
    stats: QueueStats,
}

impl<T> Inner<T> {
    fn reset_tracking(&mut self) {
        self.last_push_key = None;
        self.rollback_count = 0;
        self.prev_pop_wall_clock = None;
        self.prev_time_ref = 0;
        self.max_key = 0;
        self.stats.resets += 1;
    }

    fn take_last_and_clear(&mut self) -> Option<T> {
        let last = self.entries.pop_last().map(|(_, v)| v);
        self.entries.clear();
        last
    }
}

/// See the [module documentation](self).
pub struct TimestampQueue<T> {
    name: String,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> std::fmt::Debug for TimestampQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampQueue")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T: QueueItem> TimestampQueue<T> {
    /// Creates a queue reading time from the system clock.
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    pub fn with_clock(name: impl Into<String>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let config = QueueConfig {
            max_size: config.max_size.max(MIN_MAX_SIZE),
            max_rollback_count: config.max_rollback_count.max(1),
        };
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                last_push_key: None,
                rollback_count: 0,
                prev_pop_wall_clock: None,
                prev_time_ref: 0,
                max_key: 0,
                stats: QueueStats::default(),
            }),
            available: Condvar::new(),
        }
    }

    /// Inserts `value` under `key`.
    ///
    /// Returns `false` when the push is rejected as rollback. Never blocks.
    pub fn push(&self, key: u32, value: T) -> bool {
        let is_marker = value.is_clean_queue_marker();
        let mut inner = self.inner.lock();
        inner.stats.push_all += 1;

        let rolled_back = inner.last_push_key.is_some_and(|prev| key < prev);
        if is_marker {
            inner.reset_tracking();
        } else if rolled_back {
            inner.stats.push_failed += 1;
            inner.rollback_count += 1;
            if inner.rollback_count < self.config.max_rollback_count {
                tracing::trace!(
                    queue = %self.name,
                    key,
                    last = ?inner.last_push_key,
                    rollback = inner.rollback_count,
                    "Rejected rolled-back key"
                );
                return false;
            }
            tracing::warn!(
                queue = %self.name,
                key,
                last = ?inner.last_push_key,
                "{} consecutive rollbacks, resetting queue tracking",
                inner.rollback_count
            );
            inner.reset_tracking();
        } else {
            inner.rollback_count = 0;
        }

        inner.last_push_key = Some(key);
        inner.max_key = inner.max_key.max(key);
        inner.entries.insert(key, value);

        while inner.entries.len() >= self.config.max_size {
            if inner.entries.pop_first().is_none() {
                break;
            }
            inner.stats.evicted += 1;
        }
        inner.stats.push_success += 1;
        drop(inner);

        self.available.notify_one();
        true
    }

    /// Removes and returns the unit with the smallest key.
    pub fn pop(&self, timeout: PopTimeout) -> Option<T> {
        let mut inner = self.inner.lock();
        match timeout {
            PopTimeout::NonBlocking => {},
            PopTimeout::Forever => {
                while inner.entries.is_empty() {
                    self.available.wait(&mut inner);
                }
            },
            PopTimeout::For(duration) => {
                let deadline = Instant::now() + duration;
                while inner.entries.is_empty() {
                    if self.available.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
            },
        }

        inner.stats.pop_all += 1;
        let Some((_, value)) = inner.entries.pop_first() else {
            inner.stats.pop_nothing += 1;
            return None;
        };
        inner.stats.pop_normal += 1;
        inner.prev_pop_wall_clock = Some(self.clock.now_millis());
        Some(value)
    }

    /// Removes and returns the most recent unit, keeping older ones.
    pub fn pop_tail(&self) -> Option<T> {
        self.pop_tail_n(0)
    }

    /// Returns the `n`-th most recent unit (0 = newest) and removes it together
    /// with every newer unit. `n` is clamped to the oldest unit.
    pub fn pop_tail_n(&self, n: usize) -> Option<T> {
        let mut inner = self.inner.lock();
        inner.stats.pop_all += 1;

        let len = inner.entries.len();
        let Some(key) = inner.entries.keys().rev().nth(n.min(len.saturating_sub(1))).copied() else {
            inner.stats.pop_nothing += 1;
            return None;
        };

        let mut newer = inner.entries.split_off(&key);
        inner.stats.pop_tail += 1;
        inner.prev_pop_wall_clock = Some(self.clock.now_millis());
        newer.remove(&key)
    }

    /// Pops the unit that best matches the consumer's clock `time_ref`.
    ///
    /// If `time_ref` has not advanced past the previous call's reference, the
    /// reference is extrapolated by the wall-clock time elapsed since the
    /// previous pop. With a zero reference (nothing established yet) or a
    /// reference past every key, the newest unit is returned and the queue is
    /// emptied. Otherwise the first unit newer than the reference is returned
    /// and everything older is dropped.
    pub fn pop_by_given_time_ref(&self, time_ref: u32) -> TimeRefPop<T> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        inner.stats.pop_all += 1;

        if inner.entries.is_empty() {
            inner.stats.pop_nothing += 1;
            return TimeRefPop::Empty;
        }

        let fixed_ref = if time_ref <= inner.prev_time_ref {
            inner.prev_pop_wall_clock.map_or(0, |prev| {
                let elapsed = u32::try_from(now.saturating_sub(prev)).unwrap_or(u32::MAX);
                inner.prev_time_ref.saturating_add(elapsed)
            })
        } else {
            time_ref
        };

        let next_key = if fixed_ref == 0 {
            None
        } else {
            inner
                .entries
                .range((Bound::Excluded(fixed_ref), Bound::Unbounded))
                .next()
                .map(|(k, _)| *k)
        };

        let result = match next_key {
            Some(key) => {
                let mut kept = inner.entries.split_off(&key);
                let value = kept.remove(&key);
                inner.entries = kept;
                value.map_or(TimeRefPop::Empty, TimeRefPop::Normal)
            },
            None => inner.take_last_and_clear().map_or(TimeRefPop::Empty, TimeRefPop::Tail),
        };

        match result.outcome() {
            PopOutcome::Normal => inner.stats.pop_normal += 1,
            PopOutcome::Tail => inner.stats.pop_tail += 1,
            PopOutcome::Empty => inner.stats.pop_nothing += 1,
        }
        inner.prev_pop_wall_clock = Some(now);
        inner.prev_time_ref = time_ref;
        result
    }
}

impl<T> TimestampQueue<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Current run of consecutive rollback rejections.
    pub fn rollback_count(&self) -> u32 {
        self.inner.lock().rollback_count
    }

    /// Largest key pushed since the last reset.
    pub fn max_key(&self) -> u32 {
        self.inner.lock().max_key
    }

    /// Keys currently buffered, oldest first.
    pub fn keys(&self) -> Vec<u32> {
        self.inner.lock().entries.keys().copied().collect()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }

    /// Drops every buffered unit. Tracking state is left untouched.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Emits the counters at debug level.
    pub fn log_stats(&self) {
        let inner = self.inner.lock();
        let s = inner.stats;
        tracing::debug!(
            queue = %self.name,
            len = inner.entries.len(),
            push_all = s.push_all,
            push_success = s.push_success,
            push_failed = s.push_failed,
            evicted = s.evicted,
            pop_all = s.pop_all,
            pop_normal = s.pop_normal,
            pop_tail = s.pop_tail,
            pop_nothing = s.pop_nothing,
            "Queue statistics"
        );
    }
}
