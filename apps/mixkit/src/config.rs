// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::Level;

use mixkit_core::codec::AudioFormat;
use mixkit_core::queue_config::{QueueConfig, DEFAULT_MAX_ROLLBACK_COUNT};
use mixkit_engine::constants::{
    DEFAULT_INITIAL_PAYLOAD_WAIT, DEFAULT_MAX_CONSECUTIVE_DECODE_FAILURES, DEFAULT_RESAMPLE_CHANNELS,
    DEFAULT_RESAMPLE_FRAME_SAMPLES, DEFAULT_RESAMPLE_RATE, DEFAULT_STAGE_INPUT_QUEUE_SIZE, DEFAULT_STAGE_POP_TIMEOUT,
    DEFAULT_SUBSCRIBER_QUEUE_SIZE, DEFAULT_SWEEP_INTERVAL, DEFAULT_TASK_TIMEOUT, DEFAULT_UPDATE_POLL,
};

/// Environment variable prefix; `MIXKIT_ENGINE__TASK_TIMEOUT_MS=5000` sets `engine.task_timeout_ms`.
pub const ENV_PREFIX: &str = "MIXKIT_";

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Engine tunables as they appear in the config file. Durations are in milliseconds.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSection {
    /// Decode stage input queue capacity (default: 3600 units)
    pub stage_input_queue_size: usize,
    /// Consecutive rolled-back keys before a queue resets its tracking (default: 60)
    pub max_rollback_count: u32,
    /// Capacity of queues handed to script subscribers (default: 150 units)
    pub subscriber_queue_size: usize,
    /// How long a stage waits for input before re-checking its stop flag (default: 5)
    pub stage_pop_timeout_ms: u64,
    /// Decode failures in a row before a stage waits for a new header (default: 25)
    pub max_consecutive_decode_failures: u32,
    /// Resample stage output rate in Hz (default: 44100)
    pub resample_rate: u32,
    /// Resample stage output channel count (default: 2)
    pub resample_channels: u16,
    /// Samples per channel in each resampled frame (default: 1024)
    pub resample_frame_samples: u32,
    /// A task with no control traffic for this long is reclaimed (default: 10000)
    pub task_timeout_ms: u64,
    pub initial_payload_wait_ms: u64,
    pub update_poll_ms: u64,
    /// Period of the timeout sweep (default: 1000)
    pub sweep_interval_ms: u64,
    /// Root directory script files are resolved against
    pub resource_root: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            stage_input_queue_size: DEFAULT_STAGE_INPUT_QUEUE_SIZE,
            max_rollback_count: DEFAULT_MAX_ROLLBACK_COUNT,
            subscriber_queue_size: DEFAULT_SUBSCRIBER_QUEUE_SIZE,
            stage_pop_timeout_ms: millis(DEFAULT_STAGE_POP_TIMEOUT),
            max_consecutive_decode_failures: DEFAULT_MAX_CONSECUTIVE_DECODE_FAILURES,
            resample_rate: DEFAULT_RESAMPLE_RATE,
            resample_channels: DEFAULT_RESAMPLE_CHANNELS,
            resample_frame_samples: DEFAULT_RESAMPLE_FRAME_SAMPLES,
            task_timeout_ms: millis(DEFAULT_TASK_TIMEOUT),
            initial_payload_wait_ms: millis(DEFAULT_INITIAL_PAYLOAD_WAIT),
            update_poll_ms: millis(DEFAULT_UPDATE_POLL),
            sweep_interval_ms: millis(DEFAULT_SWEEP_INTERVAL),
            resource_root: "./scripts".to_string(),
        }
    }
}

impl EngineSection {
    pub fn to_engine_config(&self) -> mixkit_engine::EngineConfig {
        let queue = |max_size| {
            QueueConfig::default()
                .with_max_size(max_size)
                .with_max_rollback_count(self.max_rollback_count)
        };
        mixkit_engine::EngineConfig {
            stage_input_queue: queue(self.stage_input_queue_size),
            subscriber_queue: queue(self.subscriber_queue_size),
            stage_pop_timeout: Duration::from_millis(self.stage_pop_timeout_ms),
            max_consecutive_decode_failures: self.max_consecutive_decode_failures,
            resample_output: AudioFormat {
                sample_rate: self.resample_rate,
                channels: self.resample_channels,
                frame_samples: self.resample_frame_samples,
            },
            task_timeout: Duration::from_millis(self.task_timeout_ms),
            initial_payload_wait: Duration::from_millis(self.initial_payload_wait_ms),
            update_poll: Duration::from_millis(self.update_poll_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

/// Synthetic load driven by `mixkit simulate`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SimulateConfig {
    /// Number of mixing tasks
    pub tasks: usize,
    /// Input streams per task; each carries video and audio
    pub streams: usize,
    pub fps: u32,
    pub width: u16,
    pub height: u16,
    /// Input audio sample rate in Hz
    pub sample_rate: u32,
    /// How long media is fed, in seconds
    pub duration_secs: u64,
    /// Interval between keepalive control payloads, in milliseconds
    pub keepalive_ms: u64,
    /// Tasks (by index) that never send a keepalive and end up reclaimed by the sweeper
    pub idle_tasks: Vec<usize>,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            tasks: 2,
            streams: 2,
            fps: 25,
            width: 320,
            height: 180,
            sample_rate: 48_000,
            duration_secs: 5,
            keepalive_ms: 1000,
            idle_tasks: Vec::new(),
        }
    }
}

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub console_enable: bool,
    pub file_enable: bool,
    pub console_level: LogLevel,
    pub file_level: LogLevel,
    pub file_path: String,
    /// Format for file logging: "text" (default) or "json"
    pub file_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Info,
            file_path: "./mixkit.log".to_string(),
            file_format: LogFormat::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub simulate: SimulateConfig,
}

#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub file_missing: Option<String>,
}

/// Loads the application configuration from defaults, a TOML file, and environment variables.
///
/// A missing file is not an error; it is reported in [`ConfigLoadResult::file_missing`].
///
/// # Errors
///
/// Returns an error if the file is not valid TOML, a value has the wrong type,
/// or the resulting engine configuration fails validation.
pub fn load(config_path: &str) -> anyhow::Result<ConfigLoadResult> {
    let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

    let mut file_missing = None;
    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let config: Config = figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract()?;
    config.engine.to_engine_config().validate()?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Generates the default configuration as a pretty-printed TOML string.
///
/// # Errors
///
/// Returns an error if the default configuration cannot be serialized to TOML.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_defaults() {
        let section = EngineSection::default();
        assert_eq!(section.to_engine_config(), mixkit_engine::EngineConfig::default());
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let Ok(text) = generate_default() else {
            panic!("default config should serialize");
        };
        assert!(text.contains("[engine]"));
        let parsed: Config = match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => panic!("generated TOML should parse: {e}"),
        };
        assert_eq!(parsed, Config::default());
    }
}
