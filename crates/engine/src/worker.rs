// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! OS worker threads with a cooperative stop flag.
//!
//! Every stage, task and the sweeper run on a [`WorkerHandle`]. Stopping is
//! two-phase: [`request_stop`](WorkerHandle::request_stop) flips the flag the
//! loop polls, [`join`](WorkerHandle::join) waits for the loop to return.
//! Splitting the two lets owners signal many workers under a lock and join
//! them after releasing it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mixkit_core::error::Result;

/// Shared stop signal polled by a worker loop.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Owner side of a worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    stop: StopFlag,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns `body` on a named thread, handing it the stop flag.
    ///
    /// # Errors
    ///
    /// `Io` when the OS refuses to create the thread.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(StopFlag) + Send + 'static,
    {
        Self::spawn_with_flag(name, StopFlag::new(), body)
    }

    /// Like [`spawn`](Self::spawn) but with a flag the caller already shares.
    ///
    /// # Errors
    ///
    /// `Io` when the OS refuses to create the thread.
    pub fn spawn_with_flag<F>(name: impl Into<String>, stop: StopFlag, body: F) -> Result<Self>
    where
        F: FnOnce(StopFlag) + Send + 'static,
    {
        let name = name.into();
        let flag = stop.clone();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || body(flag))?;
        tracing::debug!(worker = %name, "Worker started");
        Ok(Self { name, stop, thread: Some(thread) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request_stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the worker to return. Returns `false` if it panicked.
    pub fn join(mut self) -> bool {
        self.join_inner()
    }

    fn join_inner(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };
        if thread.join().is_err() {
            tracing::error!(worker = %self.name, "Worker panicked");
            return false;
        }
        tracing::debug!(worker = %self.name, "Worker joined");
        true
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.request_stop();
            self.join_inner();
        }
    }
}
