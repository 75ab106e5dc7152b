// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Process-wide registry of mixing tasks.
//!
//! The manager maps task ids to [`TaskRegistry`] instances and routes encoded
//! units and control payloads to them. Lookups for unknown ids are silent
//! no-ops. Tasks are removed under the registry lock and joined after it is
//! released, so a slow teardown never blocks routing for other tasks.

use opentelemetry::global;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use mixkit_core::control::{task_id_of, TaskDescriptor};
use mixkit_core::error::{MixKitError, Result};
use mixkit_core::fanout::FanoutTarget;
use mixkit_core::state::TaskStopReason;
use mixkit_core::types::MediaPacket;

use crate::config::EngineConfig;
use crate::services::EngineServices;
use crate::task::TaskRegistry;

pub struct TaskManager {
    config: Arc<EngineConfig>,
    services: RwLock<Option<Arc<EngineServices>>>,
    tasks: Mutex<HashMap<String, Arc<TaskRegistry>>>,
    tasks_active_gauge: opentelemetry::metrics::Gauge<u64>,
    tasks_started_counter: opentelemetry::metrics::Counter<u64>,
    tasks_reclaimed_counter: opentelemetry::metrics::Counter<u64>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("initialized", &self.is_initialized())
            .field("tasks", &self.task_ids())
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    pub fn new(config: EngineConfig) -> Self {
        let meter = global::meter("mixkit_tasks");
        Self {
            config: Arc::new(config),
            services: RwLock::new(None),
            tasks: Mutex::new(HashMap::new()),
            tasks_active_gauge: meter
                .u64_gauge("tasks.active")
                .with_description("Number of running mixing tasks")
                .build(),
            tasks_started_counter: meter
                .u64_counter("tasks.started")
                .with_description("Total number of tasks started")
                .build(),
            tasks_reclaimed_counter: meter
                .u64_counter("tasks.reclaimed")
                .with_description("Tasks removed by the timeout sweep")
                .build(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Installs the external services. Must be called before `add_task`.
    ///
    /// # Errors
    ///
    /// `Configuration` when the engine configuration or the services are invalid.
    pub fn init(&self, services: EngineServices) -> Result<()> {
        self.config.validate()?;
        services.validate()?;
        tracing::info!(resource_root = %services.resource_root.display(), "Task manager initialized");
        *self.services.write() = Some(Arc::new(services));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.services.read().is_some()
    }

    fn record_active(&self, count: usize) {
        self.tasks_active_gauge.record(count as u64, &[]);
    }

    /// Starts the task described by `payload`, or hands the payload to the task
    /// as an update if it already runs. Returns the task id.
    ///
    /// # Errors
    ///
    /// `Configuration` before `init` or for a payload without a usable task id
    /// or task type; any error from the script factory or thread spawn.
    pub fn add_task(&self, payload: Value) -> Result<String> {
        let services = self
            .services
            .read()
            .clone()
            .ok_or_else(|| MixKitError::Configuration("task manager used before init".into()))?;
        let mut descriptor = TaskDescriptor::from_payload(&payload)?;
        let task_id = descriptor.task_id.clone();
        descriptor.script_file = descriptor
            .script_file
            .take()
            .map(|file| services.resolve(file).to_string_lossy().into_owned());

        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get(&task_id) {
            tracing::debug!(task_id = %task_id, "Task exists, treating payload as update");
            task.push_control_payload(payload);
            return Ok(task_id);
        }

        let engine = services.scripts.create(&descriptor)?;
        let task = Arc::new(TaskRegistry::new(descriptor, engine, Arc::clone(&self.config), services));
        task.start()?;
        task.push_control_payload(payload);
        tasks.insert(task_id.clone(), task);

        self.tasks_started_counter.add(1, &[]);
        self.record_active(tasks.len());
        drop(tasks);

        tracing::info!(task_id = %task_id, "Task added");
        Ok(task_id)
    }

    /// Routes an update payload to the task named by its `task_id`.
    pub fn update(&self, payload: Value) -> bool {
        let Some(task_id) = task_id_of(&payload).map(str::to_string) else {
            tracing::warn!("Update payload without task_id ignored");
            return false;
        };
        self.push_control_payload(&task_id, payload)
    }

    pub fn push_control_payload(&self, task_id: &str, payload: Value) -> bool {
        let Some(task) = self.find_task(task_id) else {
            tracing::debug!(task_id = %task_id, "Control payload for unknown task dropped");
            return false;
        };
        task.push_control_payload(payload);
        true
    }

    /// Forwards an encoded unit to a task. Unknown tasks drop it silently.
    pub fn route_encoded_unit(&self, task_id: &str, packet: MediaPacket) -> bool {
        self.find_task(task_id).is_some_and(|task| task.route_encoded_unit(packet))
    }

    /// Subscribes an externally owned target to a task's input stream.
    pub fn subscribe(&self, task_id: &str, stream_name: &str, subscriber: &str, target: Arc<FanoutTarget>) -> bool {
        let Some(task) = self.find_task(task_id) else {
            return false;
        };
        task.subscribe(stream_name, subscriber, target);
        true
    }

    pub fn find_task(&self, task_id: &str) -> Option<Arc<TaskRegistry>> {
        self.tasks.lock().get(task_id).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn reclaim(removed: Vec<Arc<TaskRegistry>>) {
        for task in removed {
            if !task.join() {
                tracing::error!(task_id = %task.task_id(), "Task worker panicked");
            }
        }
    }

    /// Stops and removes one task. Returns whether it existed.
    pub fn stop_task(&self, task_id: &str) -> bool {
        let removed = {
            let mut tasks = self.tasks.lock();
            let removed = tasks.remove(task_id);
            if let Some(task) = &removed {
                task.request_stop(TaskStopReason::Stopped);
            }
            self.record_active(tasks.len());
            removed
        };
        let Some(task) = removed else {
            tracing::debug!(task_id = %task_id, "Stop for unknown task");
            return false;
        };
        Self::reclaim(vec![task]);
        tracing::info!(task_id = %task_id, "Task stopped");
        true
    }

    /// Removes tasks that saw no control traffic within the timeout, and tasks
    /// whose worker already ended. Returns how many were removed.
    pub fn check_timeout_tasks(&self) -> usize {
        let removed: Vec<Arc<TaskRegistry>> = {
            let mut tasks = self.tasks.lock();
            let expired: Vec<String> = tasks
                .iter()
                .filter(|(_, task)| task.is_timeout() || task.is_finished())
                .map(|(id, _)| id.clone())
                .collect();

            let removed: Vec<_> = expired.iter().filter_map(|id| tasks.remove(id)).collect();
            for task in &removed {
                let reason =
                    if task.is_finished() { TaskStopReason::Stopped } else { TaskStopReason::TimedOut };
                tracing::info!(
                    task_id = %task.task_id(),
                    idle_ms = task.idle_millis(),
                    ?reason,
                    "Reclaiming task"
                );
                task.request_stop(reason);
            }
            if !removed.is_empty() {
                self.record_active(tasks.len());
            }
            removed
        };

        let count = removed.len();
        if count > 0 {
            self.tasks_reclaimed_counter.add(count as u64, &[]);
            Self::reclaim(removed);
        }
        count
    }

    /// Stops and joins every task. Returns how many were stopped.
    pub fn shutdown_all(&self) -> usize {
        let removed: Vec<Arc<TaskRegistry>> = {
            let mut tasks = self.tasks.lock();
            let removed: Vec<_> = tasks.drain().map(|(_, task)| task).collect();
            for task in &removed {
                task.request_stop(TaskStopReason::Shutdown);
            }
            self.record_active(0);
            removed
        };

        let count = removed.len();
        Self::reclaim(removed);
        tracing::info!(tasks = count, "All tasks shut down");
        count
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
