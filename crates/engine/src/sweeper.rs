// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Periodic reclamation of orphaned tasks.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mixkit_core::error::Result;

use crate::manager::TaskManager;
use crate::worker::WorkerHandle;

/// Upper bound on how long the sweeper sleeps before re-checking its stop flag.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Calls [`TaskManager::check_timeout_tasks`] every `interval` until stopped.
#[derive(Debug)]
pub struct TimeoutSweeper {
    worker: WorkerHandle,
}

impl TimeoutSweeper {
    /// # Errors
    ///
    /// `Io` if the thread cannot be spawned.
    pub fn spawn(manager: Arc<TaskManager>, interval: Duration) -> Result<Self> {
        let worker = WorkerHandle::spawn("task-sweeper", move |stop| {
            let mut next = Instant::now() + interval;
            while !stop.is_stopped() {
                let now = Instant::now();
                if now < next {
                    thread::sleep((next - now).min(STOP_POLL));
                    continue;
                }
                let reclaimed = manager.check_timeout_tasks();
                if reclaimed > 0 {
                    tracing::info!(reclaimed, remaining = manager.task_count(), "Timeout sweep");
                }
                next = Instant::now() + interval;
            }
        })?;
        Ok(Self { worker })
    }

    /// Stops the sweeper and waits for it.
    pub fn stop(self) {
        self.worker.request_stop();
        self.worker.join();
    }
}
