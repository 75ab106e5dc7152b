// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Configuration for stages, tasks and the task manager.

use std::time::Duration;

use mixkit_core::codec::AudioFormat;
use mixkit_core::error::{MixKitError, Result};
use mixkit_core::queue_config::QueueConfig;

use crate::constants::{
    DEFAULT_INITIAL_PAYLOAD_WAIT, DEFAULT_MAX_CONSECUTIVE_DECODE_FAILURES, DEFAULT_RESAMPLE_CHANNELS,
    DEFAULT_RESAMPLE_FRAME_SAMPLES, DEFAULT_RESAMPLE_RATE, DEFAULT_STAGE_INPUT_QUEUE_SIZE,
    DEFAULT_STAGE_POP_TIMEOUT, DEFAULT_SUBSCRIBER_QUEUE_SIZE, DEFAULT_SWEEP_INTERVAL,
    DEFAULT_TASK_TIMEOUT, DEFAULT_UPDATE_POLL,
};

/// Engine-wide tunables, passed explicitly to every manager, task and stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Input queue of each decode stage (default: 3600 units, 60 rollbacks)
    pub stage_input_queue: QueueConfig,
    /// Queues created for script subscribers (default: 150 units)
    pub subscriber_queue: QueueConfig,
    /// Stage input pop timeout (default: 5ms)
    pub stage_pop_timeout: Duration,
    /// Failures in a row before a stage drops its configuration (default: 25)
    pub max_consecutive_decode_failures: u32,
    /// Format produced by audio resample stages (default: 44.1kHz stereo, 1024 samples)
    pub resample_output: AudioFormat,
    /// Liveness window for control traffic (default: 10s)
    pub task_timeout: Duration,
    /// Wait slice for the first control payload (default: 100ms)
    pub initial_payload_wait: Duration,
    /// Wait slice for update payloads between process steps (default: 10ms)
    pub update_poll: Duration,
    /// Timeout sweeper period (default: 1s)
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stage_input_queue: QueueConfig::default().with_max_size(DEFAULT_STAGE_INPUT_QUEUE_SIZE),
            subscriber_queue: QueueConfig::default().with_max_size(DEFAULT_SUBSCRIBER_QUEUE_SIZE),
            stage_pop_timeout: DEFAULT_STAGE_POP_TIMEOUT,
            max_consecutive_decode_failures: DEFAULT_MAX_CONSECUTIVE_DECODE_FAILURES,
            resample_output: AudioFormat {
                sample_rate: DEFAULT_RESAMPLE_RATE,
                channels: DEFAULT_RESAMPLE_CHANNELS,
                frame_samples: DEFAULT_RESAMPLE_FRAME_SAMPLES,
            },
            task_timeout: DEFAULT_TASK_TIMEOUT,
            initial_payload_wait: DEFAULT_INITIAL_PAYLOAD_WAIT,
            update_poll: DEFAULT_UPDATE_POLL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// # Errors
    ///
    /// `Configuration` for degenerate queue limits, zero waits or an empty
    /// resample format.
    pub fn validate(&self) -> Result<()> {
        self.stage_input_queue.validate()?;
        self.subscriber_queue.validate()?;

        for (name, value) in [
            ("stage_pop_timeout", self.stage_pop_timeout),
            ("task_timeout", self.task_timeout),
            ("initial_payload_wait", self.initial_payload_wait),
            ("update_poll", self.update_poll),
            ("sweep_interval", self.sweep_interval),
        ] {
            if value.is_zero() {
                return Err(MixKitError::Configuration(format!("{name} must be non-zero")));
            }
        }

        let out = &self.resample_output;
        if out.sample_rate == 0 || out.channels == 0 || out.frame_samples == 0 {
            return Err(MixKitError::Configuration(format!(
                "invalid resample output format: {out:?}"
            )));
        }
        if self.max_consecutive_decode_failures == 0 {
            return Err(MixKitError::Configuration(
                "max_consecutive_decode_failures must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
