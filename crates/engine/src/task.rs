// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A single mixing task.
//!
//! A [`TaskRegistry`] owns the task's [`StreamPipeline`], a mailbox of control
//! payloads and one worker thread driving the [`ScriptEngine`]:
//!
//! 1. wait (in `initial_payload_wait` slices) for the first payload and `start`
//!    the script with it;
//! 2. loop: take at most one pending payload (waiting up to `update_poll`) and
//!    `update` the script with it, then run one `process` step.
//!
//! A failing script step ends the loop. Whatever the reason, the worker then
//! tears down every stage of the task before exiting.

use parking_lot::Mutex;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mixkit_core::clock::Clock;
use mixkit_core::control::{TaskCommand, TaskDescriptor};
use mixkit_core::error::{MixKitError, Result};
use mixkit_core::fanout::FanoutTarget;
use mixkit_core::state::{TaskState, TaskStopReason};
use mixkit_core::types::{MediaPacket, TimeTraceKey};

use crate::config::EngineConfig;
use crate::dispatch::apply_commands;
use crate::mailbox::Mailbox;
use crate::pipeline::StreamPipeline;
use crate::script::{ScriptEngine, TaskContext};
use crate::services::EngineServices;
use crate::worker::{StopFlag, WorkerHandle};

pub struct TaskRegistry {
    context: Arc<TaskContext>,
    pipeline: Arc<StreamPipeline>,
    mailbox: Arc<Mailbox<Value>>,
    clock: Arc<dyn Clock>,
    last_activity: AtomicU64,
    timeout_millis: u64,
    config: Arc<EngineConfig>,
    stop: StopFlag,
    requested_stop: Arc<Mutex<Option<TaskStopReason>>>,
    state: Arc<Mutex<TaskState>>,
    engine: Mutex<Option<Box<dyn ScriptEngine>>>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_id", &self.task_id())
            .field("state", &self.state())
            .field("pending_payloads", &self.mailbox.len())
            .finish_non_exhaustive()
    }
}

impl TaskRegistry {
    pub fn new(
        descriptor: TaskDescriptor,
        engine: Box<dyn ScriptEngine>,
        config: Arc<EngineConfig>,
        services: Arc<EngineServices>,
    ) -> Self {
        let stop = StopFlag::new();
        let clock = Arc::clone(&services.clock);
        let pipeline =
            Arc::new(StreamPipeline::new(descriptor.task_id.clone(), Arc::clone(&config), Arc::clone(&services)));
        let context = Arc::new(TaskContext::new(
            descriptor,
            Arc::clone(&services.sink),
            config.subscriber_queue,
            Arc::clone(&clock),
            stop.clone(),
        ));
        let timeout_millis = u64::try_from(config.task_timeout.as_millis()).unwrap_or(u64::MAX);

        Self {
            context,
            pipeline,
            mailbox: Arc::new(Mailbox::new()),
            last_activity: AtomicU64::new(clock.now_millis()),
            clock,
            timeout_millis,
            config,
            stop,
            requested_stop: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(TaskState::AwaitingConfig)),
            engine: Mutex::new(Some(engine)),
            worker: Mutex::new(None),
        }
    }

    pub fn task_id(&self) -> &str {
        self.context.task_id()
    }

    pub fn context(&self) -> &Arc<TaskContext> {
        &self.context
    }

    pub fn pipeline(&self) -> &Arc<StreamPipeline> {
        &self.pipeline
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Whether the worker loop has ended.
    pub fn is_finished(&self) -> bool {
        self.state().is_stopped()
    }

    /// Spawns the worker thread. Calling it twice is an error.
    ///
    /// # Errors
    ///
    /// `Runtime` if already started, `Io` if the thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        let engine = self
            .engine
            .lock()
            .take()
            .ok_or_else(|| MixKitError::Runtime(format!("task {} already started", self.task_id())))?;

        let task_loop = TaskLoop {
            context: Arc::clone(&self.context),
            pipeline: Arc::clone(&self.pipeline),
            mailbox: Arc::clone(&self.mailbox),
            engine,
            state: Arc::clone(&self.state),
            requested_stop: Arc::clone(&self.requested_stop),
            initial_wait: self.config.initial_payload_wait,
            update_poll: self.config.update_poll,
        };
        let worker =
            WorkerHandle::spawn_with_flag(format!("task-{}", self.task_id()), self.stop.clone(), move |stop| {
                task_loop.run(&stop);
            })?;
        *self.worker.lock() = Some(worker);
        tracing::info!(task_id = %self.task_id(), output = %self.context.output_stream(), "Task started");
        Ok(())
    }

    /// Queues a control payload and refreshes the task's liveness.
    pub fn push_control_payload(&self, payload: Value) {
        self.touch();
        self.mailbox.push(payload);
    }

    fn touch(&self) {
        self.last_activity.store(self.clock.now_millis(), Ordering::Release);
    }

    /// Milliseconds since the last control payload.
    pub fn idle_millis(&self) -> u64 {
        self.clock.now_millis().saturating_sub(self.last_activity.load(Ordering::Acquire))
    }

    /// True once no control payload arrived within the task timeout.
    ///
    /// Media traffic does not count as activity.
    pub fn is_timeout(&self) -> bool {
        self.idle_millis() > self.timeout_millis
    }

    /// Routes an encoded unit into the task's pipeline.
    pub fn route_encoded_unit(&self, mut packet: MediaPacket) -> bool {
        let source = packet.meta.stream_id;
        packet.meta.trace.record(source, TimeTraceKey::Recv, self.clock.now_millis());
        self.pipeline.route_unit(packet)
    }

    /// Subscribes an externally owned target to one of the task's input streams.
    pub fn subscribe(&self, stream_name: &str, subscriber: &str, target: Arc<FanoutTarget>) {
        self.pipeline.subscribe(stream_name, subscriber, target);
    }

    /// Asks the worker to stop. The first reason given wins.
    pub fn request_stop(&self, reason: TaskStopReason) {
        self.requested_stop.lock().get_or_insert(reason);
        self.stop.stop();
    }

    /// Waits for the worker and makes sure every stage is joined.
    ///
    /// Returns `false` if the worker panicked.
    pub fn join(&self) -> bool {
        let worker = self.worker.lock().take();
        let clean = worker.is_none_or(|worker| {
            worker.request_stop();
            worker.join()
        });
        self.pipeline.teardown_all();

        let mut state = self.state.lock();
        if !state.is_stopped() {
            *state = TaskState::Stopped(self.requested_stop.lock().unwrap_or(TaskStopReason::Stopped));
        }
        clean
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.request_stop(TaskStopReason::Stopped);
        self.join();
    }
}

/// State moved onto the task's worker thread.
struct TaskLoop {
    context: Arc<TaskContext>,
    pipeline: Arc<StreamPipeline>,
    mailbox: Arc<Mailbox<Value>>,
    engine: Box<dyn ScriptEngine>,
    state: Arc<Mutex<TaskState>>,
    requested_stop: Arc<Mutex<Option<TaskStopReason>>>,
    initial_wait: Duration,
    update_poll: Duration,
}

impl TaskLoop {
    fn run(mut self, stop: &StopFlag) {
        let reason = self.drive(stop);
        *self.state.lock() = TaskState::Stopped(reason);

        let stages = self.pipeline.teardown_all();
        tracing::info!(task_id = %self.context.task_id(), ?reason, stages, "Task stopped");
    }

    fn stop_reason(&self) -> TaskStopReason {
        self.requested_stop.lock().unwrap_or(TaskStopReason::Stopped)
    }

    fn wait_for_initial(&self, stop: &StopFlag) -> Option<Value> {
        while !stop.is_stopped() {
            if let Some(payload) = self.mailbox.pop(self.initial_wait) {
                return Some(payload);
            }
        }
        None
    }

    fn drive(&mut self, stop: &StopFlag) -> TaskStopReason {
        let Some(initial) = self.wait_for_initial(stop) else {
            return self.stop_reason();
        };
        if self.step("start", |engine, ctx| engine.start(ctx, &initial)).is_err() {
            return TaskStopReason::ScriptFailed;
        }
        *self.state.lock() = TaskState::Running;

        let reason = loop {
            if stop.is_stopped() {
                break self.stop_reason();
            }
            if let Some(payload) = self.mailbox.pop(self.update_poll) {
                if self.step("update", |engine, ctx| engine.update(ctx, &payload)).is_err() {
                    break TaskStopReason::ScriptFailed;
                }
            }
            if self.step("process", |engine, ctx| engine.process(ctx)).is_err() {
                break TaskStopReason::ScriptFailed;
            }
        };

        let engine = &mut self.engine;
        let ctx = &self.context;
        if panic::catch_unwind(AssertUnwindSafe(|| engine.stop(ctx))).is_err() {
            tracing::error!(task_id = %ctx.task_id(), "Script stop panicked");
        }
        reason
    }

    /// Runs one script call and applies the commands it returns.
    fn step<F>(&mut self, name: &str, call: F) -> Result<()>
    where
        F: FnOnce(&mut dyn ScriptEngine, &TaskContext) -> Result<Vec<TaskCommand>>,
    {
        let engine = self.engine.as_mut();
        let ctx = self.context.as_ref();
        let commands = match panic::catch_unwind(AssertUnwindSafe(|| call(engine, ctx))) {
            Ok(Ok(commands)) => commands,
            Ok(Err(e)) => {
                tracing::error!(task_id = %ctx.task_id(), step = name, error = %e, "Script step failed");
                return Err(e);
            },
            Err(_) => {
                tracing::error!(task_id = %ctx.task_id(), step = name, "Script step panicked");
                return Err(MixKitError::Script(format!("{name} panicked")));
            },
        };
        apply_commands(ctx, &self.pipeline, commands);
        Ok(())
    }
}
