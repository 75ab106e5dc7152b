// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stage and task lifecycle states.
//!
//! ## Decode stage
//!
//! ```text
//!               configure(header) ok
//!   NotReady ─────────────────────────→ Ready ──┐ identical header
//!      ↑                                  │ ←───┘ (no-op)
//!      └──────────────────────────────────┘
//!        different header, or repeated decode failures
//! ```
//!
//! ## Task
//!
//! ```text
//!   AwaitingConfig ──start ok──→ Running ──→ Stopped(reason)
//!         │                                      ↑
//!         └──────── stop / start failed ─────────┘
//! ```

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// Configuration state of a decode stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// No usable configuration. Non-header units are dropped.
    #[default]
    NotReady,
    /// Configured; units are decoded and dispatched.
    Ready,
}

impl StageState {
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Why a task's worker loop ended.
///
/// Serialized as a snake_case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStopReason {
    /// The scripting engine rejected a configuration or a process step.
    ScriptFailed,
    /// No control payload within the liveness window.
    TimedOut,
    /// `stop_task` or a stop signal before the first payload arrived.
    Stopped,
    /// Process-wide shutdown.
    Shutdown,
    /// A reason not recognized by this version.
    Unknown,
}

impl<'de> Deserialize<'de> for TaskStopReason {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from(value.as_str()))
    }
}

impl From<&str> for TaskStopReason {
    fn from(value: &str) -> Self {
        match value {
            "script_failed" => Self::ScriptFailed,
            "timed_out" | "timeout" => Self::TimedOut,
            "stopped" => Self::Stopped,
            "shutdown" => Self::Shutdown,
            _ => Self::Unknown,
        }
    }
}

/// Runtime state of a mixing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum TaskState {
    /// Waiting for the first control payload.
    AwaitingConfig,
    Running,
    Stopped(TaskStopReason),
}

impl TaskState {
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_round_trip() {
        let json = serde_json::to_string(&TaskStopReason::ScriptFailed).unwrap_or_default();
        assert_eq!(json, "\"script_failed\"");
        let parsed: TaskStopReason = serde_json::from_str("\"timeout\"").unwrap_or(TaskStopReason::Unknown);
        assert_eq!(parsed, TaskStopReason::TimedOut);
    }

    #[test]
    fn unknown_reason_is_tolerated() {
        let parsed: Result<TaskStopReason, _> = serde_json::from_str("\"exploded\"");
        assert!(matches!(parsed, Ok(TaskStopReason::Unknown)));
    }

    #[test]
    fn task_state_serializes_with_reason() {
        let json = serde_json::to_value(TaskState::Stopped(TaskStopReason::Shutdown))
            .unwrap_or(serde_json::Value::Null);
        assert_eq!(json["state"], "stopped");
        assert_eq!(json["reason"], "shutdown");
        assert!(TaskState::Stopped(TaskStopReason::Shutdown).is_stopped());
        assert!(!TaskState::Running.is_stopped());
    }

    #[test]
    fn stage_defaults_to_not_ready() {
        assert_eq!(StageState::default(), StageState::NotReady);
        assert!(StageState::Ready.is_ready());
    }
}
