// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for MixKit.
//!
//! Most failures inside the media path are recovered locally and only show up
//! in counters and logs. The variants below cover what does cross a boundary:
//! collaborator setup, control documents, script steps and worker spawning.

use thiserror::Error;

/// Main error type for MixKit operations.
#[derive(Debug, Error)]
pub enum MixKitError {
    /// Configuration or parameter validation error.
    ///
    /// Examples:
    /// - Control document without a `task_id`
    /// - Queue configured with a zero capacity
    /// - Task manager used before `init`
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Runtime processing error during normal operation.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Codec-specific error (decoder setup, decode, resampling).
    ///
    /// Examples:
    /// - Decoder rejected a configuration header
    /// - Packet could not be decoded
    /// - Unsupported sample format for the resampler
    #[error("Codec error: {0}")]
    Codec(String),

    /// The scripting collaborator rejected a configuration or a process step.
    ///
    /// This is the only error that ends a task.
    #[error("Script error: {0}")]
    Script(String),

    /// I/O error (thread spawning, file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed control document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Resource exhaustion or limit exceeded.
    #[error("Resource exhaustion: {0}")]
    ResourceExhausted(String),
}

/// Convenience alias for `Result<T, MixKitError>`.
pub type Result<T> = std::result::Result<T, MixKitError>;

impl From<String> for MixKitError {
    fn from(s: String) -> Self {
        Self::Runtime(s)
    }
}

impl From<&str> for MixKitError {
    fn from(s: &str) -> Self {
        Self::Runtime(s.to_string())
    }
}
