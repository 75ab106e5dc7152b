// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! MixKit Core - data model and synchronization primitives for live media mixing.
//!
//! This crate holds everything that does not own a thread:
//!
//! ## Core Modules
//!
//! - [`types`]: Media units (MediaPacket, MediaFrame) and their metadata
//! - [`queue`]: TimestampQueue, the bounded timestamp-keyed buffer
//! - [`fanout`]: FanoutTarget, a consumer's bundle of queues
//! - [`codec`]: Decoder and resampler seams to the external codec engine
//! - [`control`]: Commands exchanged with the scripting engine
//! - [`state`]: Stage and task state machines
//! - [`stats`]: Queue and stage counters
//! - [`queue_config`]: Queue tunables
//! - [`clock`]: Injectable wall clock
//! - [`error`]: Error types and handling
//!
//! ## Quick Start
//!
//! ```
//! use mixkit_core::queue::{PopTimeout, TimestampQueue};
//! use mixkit_core::queue_config::QueueConfig;
//! use mixkit_core::types::{MediaKind, MediaPacket};
//!
//! let queue = TimestampQueue::new("cam-a.input", QueueConfig::default());
//! assert!(queue.push(40, MediaPacket::clean_queue_marker(MediaKind::Video, 40)));
//! assert!(queue.pop(PopTimeout::NonBlocking).is_some());
//! ```

pub mod clock;
pub mod codec;
pub mod control;
pub mod error;
pub mod fanout;
pub mod queue;
pub mod queue_config;
pub mod state;
pub mod stats;
pub mod types;

// Convenience re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{AudioFormat, CodecHeader, DecodedFrame, Decoder, DecoderFactory, Resampler, ResamplerFactory};
pub use control::{OutputState, TaskCommand, TaskDescriptor};
pub use error::{MixKitError, Result};
pub use fanout::{FanoutTarget, MediaSelector};
pub use queue::{PopOutcome, PopTimeout, QueueItem, TimeRefPop, TimestampQueue};
pub use queue_config::QueueConfig;
pub use state::{StageState, TaskState, TaskStopReason};
pub use stats::{QueueStats, StageCounters, StageStats};
pub use types::{
    CodecKind, FrameRole, MediaFrame, MediaKind, MediaMeta, MediaPacket, SharedFrame, SharedPacket,
    TimeTrace, TimeTraceKey,
};
