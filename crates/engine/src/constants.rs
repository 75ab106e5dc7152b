// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Default timings and sizes for stages and tasks.
//!
//! [`EngineConfig`](crate::EngineConfig) starts from these values; the server
//! configuration overrides them per deployment.

use std::time::Duration;

// === Stages ===

/// How long a stage worker waits on its input queue before re-checking its
/// stop flag.
///
/// This bounds how late a stage notices shutdown. It is also the idle wake-up
/// rate of every stage, so keep it in the low milliseconds.
pub const DEFAULT_STAGE_POP_TIMEOUT: Duration = Duration::from_millis(5);

/// Consecutive decode failures after which a ready stage drops its
/// configuration and waits for a fresh header.
pub const DEFAULT_MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 25;

/// Capacity of a stage's input queue, in units.
pub const DEFAULT_STAGE_INPUT_QUEUE_SIZE: usize = mixkit_core::queue_config::DEFAULT_MAX_SIZE;

/// Capacity of each subscriber queue created for a script, in units.
///
/// Subscribers usually consume close to real time, so this is far smaller
/// than the input queue: 150 frames is six seconds of 25 fps video.
pub const DEFAULT_SUBSCRIBER_QUEUE_SIZE: usize = 150;

// === Resampling ===

/// Output sample rate of the resample stage.
pub const DEFAULT_RESAMPLE_RATE: u32 = 44_100;

/// Output channel count of the resample stage.
pub const DEFAULT_RESAMPLE_CHANNELS: u16 = 2;

/// Samples per channel in each resampled frame.
pub const DEFAULT_RESAMPLE_FRAME_SAMPLES: u32 = 1024;

// === Tasks ===

/// A task without control traffic for this long is considered orphaned.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait slice while a task waits for its first control payload.
pub const DEFAULT_INITIAL_PAYLOAD_WAIT: Duration = Duration::from_millis(100);

/// Wait slice for update payloads between two script process steps.
///
/// Also the cadence of process steps when no updates arrive.
pub const DEFAULT_UPDATE_POLL: Duration = Duration::from_millis(10);

/// Period of the timeout sweeper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
