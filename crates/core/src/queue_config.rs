// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Tunables for [`TimestampQueue`](crate::queue::TimestampQueue).
//!
//! Both limits are empirical. They are passed to each queue explicitly so
//! callers can size input queues and subscriber queues differently.

use serde::{Deserialize, Serialize};

use crate::error::{MixKitError, Result};

/// Default maximum number of buffered units per queue.
///
/// At 25 fps this is about two and a half minutes of video.
pub const DEFAULT_MAX_SIZE: usize = 3600;

/// Default number of consecutive rollback rejections before a queue resets
/// its tracking and accepts the rolled-back key.
pub const DEFAULT_MAX_ROLLBACK_COUNT: u32 = 60;

/// Smallest accepted `max_size`. Eviction runs while `len >= max_size`, so a
/// size of one would drop every unit on arrival.
pub const MIN_MAX_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_size: usize,
    pub max_rollback_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_size: DEFAULT_MAX_SIZE, max_rollback_count: DEFAULT_MAX_ROLLBACK_COUNT }
    }
}

impl QueueConfig {
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub const fn with_max_rollback_count(mut self, count: u32) -> Self {
        self.max_rollback_count = count;
        self
    }

    /// # Errors
    ///
    /// Returns `Configuration` when `max_size` is below [`MIN_MAX_SIZE`] or the
    /// rollback threshold is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_size < MIN_MAX_SIZE {
            return Err(MixKitError::Configuration(format!(
                "queue max_size must be at least {MIN_MAX_SIZE}, got {}",
                self.max_size
            )));
        }
        if self.max_rollback_count == 0 {
            return Err(MixKitError::Configuration(
                "queue max_rollback_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = QueueConfig::default();
        assert_eq!(config.max_size, 3600);
        assert_eq!(config.max_rollback_count, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_limits() {
        assert!(QueueConfig::default().with_max_size(1).validate().is_err());
        assert!(QueueConfig::default().with_max_rollback_count(0).validate().is_err());
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config: QueueConfig = serde_json::from_str(r#"{"max_size": 16}"#).unwrap_or_default();
        assert_eq!(config.max_size, 16);
        assert_eq!(config.max_rollback_count, DEFAULT_MAX_ROLLBACK_COUNT);
    }
}
