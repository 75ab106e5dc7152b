// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The scripting seam.
//!
//! A task's mixing logic runs in an external [`ScriptEngine`]. The engine sees
//! the task through a [`TaskContext`]: it can read frames from the targets it
//! subscribed, read the output state and publish encoded output. Everything
//! that changes the task's wiring goes back as [`TaskCommand`]s.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mixkit_core::clock::Clock;
use mixkit_core::control::{OutputState, TaskCommand, TaskDescriptor};
use mixkit_core::error::Result;
use mixkit_core::fanout::FanoutTarget;
use mixkit_core::queue_config::QueueConfig;
use mixkit_core::types::{MediaPacket, TimeTraceKey};

use crate::worker::StopFlag;

/// Drives one task's mixing logic.
///
/// Any `Err` from `start`, `update` or `process` ends the task.
pub trait ScriptEngine: Send {
    /// Applies the task's initial control payload.
    fn start(&mut self, ctx: &TaskContext, payload: &Value) -> Result<Vec<TaskCommand>>;

    /// Applies a later control payload.
    fn update(&mut self, ctx: &TaskContext, payload: &Value) -> Result<Vec<TaskCommand>>;

    /// Runs one mixing step.
    fn process(&mut self, ctx: &TaskContext) -> Result<Vec<TaskCommand>>;

    /// Releases script resources. Called once, after a successful `start`.
    fn stop(&mut self, ctx: &TaskContext);
}

/// Creates a script engine for a new task.
pub trait ScriptEngineFactory: Send + Sync {
    fn create(&self, descriptor: &TaskDescriptor) -> Result<Box<dyn ScriptEngine>>;
}

/// Receives encoded output published by tasks.
pub trait OutputSink: Send + Sync {
    fn publish(&self, task_id: &str, stream_name: &str, packet: MediaPacket);
}

impl<F> OutputSink for F
where
    F: Fn(&str, &str, MediaPacket) + Send + Sync,
{
    fn publish(&self, task_id: &str, stream_name: &str, packet: MediaPacket) {
        self(task_id, stream_name, packet);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn publish(&self, _task_id: &str, _stream_name: &str, _packet: MediaPacket) {}
}

/// A task as seen by its script engine.
pub struct TaskContext {
    descriptor: TaskDescriptor,
    targets: RwLock<HashMap<String, Arc<FanoutTarget>>>,
    output: Mutex<OutputState>,
    sink: Arc<dyn OutputSink>,
    subscriber_queue: QueueConfig,
    clock: Arc<dyn Clock>,
    stop: StopFlag,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.descriptor.task_id)
            .field("output_stream", &self.descriptor.output_stream)
            .field("targets", &self.targets.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    pub fn new(
        descriptor: TaskDescriptor,
        sink: Arc<dyn OutputSink>,
        subscriber_queue: QueueConfig,
        clock: Arc<dyn Clock>,
        stop: StopFlag,
    ) -> Self {
        Self {
            descriptor,
            targets: RwLock::new(HashMap::new()),
            output: Mutex::new(OutputState::default()),
            sink,
            subscriber_queue,
            clock,
            stop,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.descriptor.task_id
    }

    pub fn output_stream(&self) -> &str {
        &self.descriptor.output_stream
    }

    pub const fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// The target registered for `subscriber`, if the script subscribed it.
    pub fn target(&self, subscriber: &str) -> Option<Arc<FanoutTarget>> {
        self.targets.read().get(subscriber).cloned()
    }

    pub fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the target for `subscriber`, creating it on first use.
    pub fn target_or_create(&self, subscriber: &str) -> Arc<FanoutTarget> {
        if let Some(target) = self.target(subscriber) {
            return target;
        }
        let mut targets = self.targets.write();
        Arc::clone(targets.entry(subscriber.to_string()).or_insert_with(|| {
            Arc::new(FanoutTarget::with_clock(
                format!("{}/{subscriber}", self.descriptor.task_id),
                self.subscriber_queue,
                Arc::clone(&self.clock),
            ))
        }))
    }

    pub fn output_state(&self) -> OutputState {
        self.output.lock().clone()
    }

    pub(crate) fn apply_output(&self, command: &TaskCommand) {
        self.output.lock().apply(command);
    }

    /// Hands an encoded output packet to the sink, stamped with the send time.
    ///
    /// Returns `false` (and drops the packet) once the task is stopping.
    pub fn publish(&self, mut packet: MediaPacket) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        if packet.meta.stream_name.is_empty() {
            packet.meta.stream_name.clone_from(&self.descriptor.output_stream);
        }
        let source = packet.meta.stream_id;
        packet.meta.trace.record(source, TimeTraceKey::Send, self.clock.now_millis());
        self.sink.publish(&self.descriptor.task_id, &self.descriptor.output_stream, packet);
        true
    }
}
