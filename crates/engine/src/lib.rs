// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! engine: Threaded pipelines and task orchestration for MixKit.
//!
//! One OS thread per stage, one per task, plus an optional sweeper. No async
//! runtime is involved; all waiting is on condition variables with bounded
//! timeouts, and every worker polls a stop flag.
//!
//! ```text
//! TaskManager ─┬─ TaskRegistry (worker: script loop)
//!              │     └─ StreamPipeline
//!              │           ├─ "cam-a"/video: decode ──→ subscribers
//!              │           └─ "cam-a"/audio: decode ──→ resample ──→ subscribers
//!              └─ TaskRegistry ...
//! ```

// --- Public Modules ---

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod mailbox;
pub mod manager;
pub mod passthrough;
pub mod pipeline;
pub mod script;
pub mod services;
pub mod stage;
pub mod sweeper;
pub mod task;
pub mod worker;

// Re-exports
pub use config::EngineConfig;
pub use manager::TaskManager;
pub use pipeline::{StageChain, StreamPipeline};
pub use script::{NullSink, OutputSink, ScriptEngine, ScriptEngineFactory, TaskContext};
pub use services::EngineServices;
pub use stage::{StageContext, StageRole};
pub use sweeper::TimeoutSweeper;
pub use task::TaskRegistry;

#[cfg(test)]
mod tests;
