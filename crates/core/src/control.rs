// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Control protocol between a task and its scripting engine.
//!
//! The scripting engine never touches stages or queues directly. Each step it
//! runs returns a list of [`TaskCommand`]s which the engine's dispatcher
//! applies to the task's pipelines and output state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MixKitError, Result};
use crate::fanout::MediaSelector;
use crate::types::CodecKind;

/// A command issued by a script step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskCommand {
    /// Subscribe the named consumer to a stream's decoded output.
    ///
    /// Works whether or not the stream has been seen yet.
    Subscribe {
        stream_name: String,
        subscriber: String,
        #[serde(default = "default_media")]
        media: Vec<MediaSelector>,
    },
    /// Detach the named consumer from a stream.
    Unsubscribe { stream_name: String, subscriber: String },
    /// Configure the output encoder.
    ConfigureCodec {
        codec: CodecKind,
        width: u32,
        height: u32,
        fps: u32,
        kbps: u32,
    },
    /// Change the output bitrate only.
    SetBitrate { kbps: u32 },
    /// Replace the composite layout handed to the compositor.
    Composite { layers: Vec<Value> },
}

fn default_media() -> Vec<MediaSelector> {
    vec![MediaSelector::VideoFrame, MediaSelector::AudioFrame]
}

/// Output encoder settings as last configured by the script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    pub codec: Option<CodecKind>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub kbps: u32,
}

/// Everything the commands have configured on a task's output so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputState {
    pub settings: OutputSettings,
    pub layers: Vec<Value>,
    /// Bumped on every applied command.
    pub revision: u64,
}

impl OutputState {
    /// Applies an output command. Subscription commands are ignored here.
    pub fn apply(&mut self, command: &TaskCommand) {
        match command {
            TaskCommand::ConfigureCodec { codec, width, height, fps, kbps } => {
                self.settings = OutputSettings {
                    codec: Some(*codec),
                    width: *width,
                    height: *height,
                    fps: *fps,
                    kbps: *kbps,
                };
            },
            TaskCommand::SetBitrate { kbps } => self.settings.kbps = *kbps,
            TaskCommand::Composite { layers } => self.layers.clone_from(layers),
            TaskCommand::Subscribe { .. } | TaskCommand::Unsubscribe { .. } => return,
        }
        self.revision += 1;
    }
}

/// Task kinds the manager knows how to run.
pub const SCRIPT_TASK_TYPES: &[&str] = &["script", "lua"];

/// Identity of a task as read from its first control payload.
///
/// ```json
/// {
///   "task_id": "t-42",
///   "task_type": "script",
///   "task_file": "mix/grid.lua",
///   "output_stream": { "streamname": "mix-out" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub task_id: String,
    pub output_stream: String,
    pub script_file: Option<String>,
    pub task_type: String,
}

impl TaskDescriptor {
    /// Reads the task's identity out of a control payload.
    ///
    /// # Errors
    ///
    /// `Configuration` when `task_id` is missing or empty, or `task_type`
    /// names something other than a script task.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let task_id = task_id_of(payload)
            .ok_or_else(|| MixKitError::Configuration("control payload has no task_id".into()))?
            .to_string();

        let task_type =
            payload.get("task_type").and_then(Value::as_str).unwrap_or("script").to_string();
        if !SCRIPT_TASK_TYPES.contains(&task_type.as_str()) {
            return Err(MixKitError::Configuration(format!(
                "unsupported task_type '{task_type}' for task {task_id}"
            )));
        }

        let output_stream = payload
            .pointer("/output_stream/streamname")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let script_file = payload.get("task_file").and_then(Value::as_str).map(str::to_string);

        Ok(Self { task_id, output_stream, script_file, task_type })
    }
}

/// The non-empty `task_id` of a control payload, if any.
pub fn task_id_of(payload: &Value) -> Option<&str> {
    payload.get("task_id").and_then(Value::as_str).filter(|id| !id.is_empty())
}
