// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Unit tests for the engine crate.

mod pipeline;
mod stage;

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mixkit_core::control::{TaskCommand, TaskDescriptor};
use mixkit_core::error::{MixKitError, Result};
use mixkit_core::types::{CodecKind, FrameRole, MediaKind, MediaMeta, MediaPacket};

use crate::config::EngineConfig;
use crate::passthrough::{audio_header, video_header, PassthroughDecoderFactory, PassthroughResamplerFactory};
use crate::script::{ScriptEngine, ScriptEngineFactory, TaskContext};
use crate::services::EngineServices;

pub(super) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Polls `condition` until it holds or `timeout` passes.
pub(super) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub(super) const WAIT: Duration = Duration::from_secs(5);

pub(super) fn fast_config() -> EngineConfig {
    EngineConfig {
        initial_payload_wait: Duration::from_millis(10),
        update_poll: Duration::from_millis(2),
        sweep_interval: Duration::from_millis(20),
        ..EngineConfig::default()
    }
}

pub(super) fn services(scripts: Arc<dyn ScriptEngineFactory>) -> EngineServices {
    EngineServices::new(
        Arc::new(PassthroughDecoderFactory),
        Arc::new(PassthroughResamplerFactory),
        scripts,
        "assets",
    )
}

pub(super) fn packet(stream: &str, kind: MediaKind, role: FrameRole, dts: u32, payload: &[u8]) -> MediaPacket {
    let codec = if kind == MediaKind::Video { CodecKind::H264 } else { CodecKind::Aac };
    let meta = MediaMeta::new(kind, role, codec, dts).with_stream(1, stream);
    MediaPacket::new(meta, bytes::Bytes::copy_from_slice(payload))
}

pub(super) fn video_config(stream: &str, dts: u32) -> MediaPacket {
    packet(stream, MediaKind::Video, FrameRole::Header, dts, &video_header(320, 240))
}

pub(super) fn video_frame(stream: &str, dts: u32) -> MediaPacket {
    packet(stream, MediaKind::Video, FrameRole::Predicted, dts, b"pixels")
}

pub(super) fn audio_config(stream: &str, dts: u32) -> MediaPacket {
    packet(stream, MediaKind::Audio, FrameRole::Header, dts, &audio_header(48_000, 2))
}

pub(super) fn descriptor(task_id: &str) -> TaskDescriptor {
    TaskDescriptor {
        task_id: task_id.to_string(),
        output_stream: format!("{task_id}-out"),
        script_file: None,
        task_type: "script".to_string(),
    }
}

/// What a [`ScriptedEngine`] saw.
#[derive(Debug, Default)]
pub(super) struct ScriptLog {
    pub starts: Vec<Value>,
    pub updates: Vec<Value>,
    pub processes: usize,
    pub stops: usize,
}

/// Script engine driven by canned behaviour.
pub(super) struct ScriptedEngine {
    log: Arc<Mutex<ScriptLog>>,
    on_start: Vec<TaskCommand>,
    fail_start: bool,
    fail_update: bool,
    fail_after_processes: Option<usize>,
}

impl ScriptEngine for ScriptedEngine {
    fn start(&mut self, _ctx: &TaskContext, payload: &Value) -> Result<Vec<TaskCommand>> {
        self.log.lock().starts.push(payload.clone());
        if self.fail_start {
            return Err(MixKitError::Script("bad initial config".into()));
        }
        Ok(std::mem::take(&mut self.on_start))
    }

    fn update(&mut self, _ctx: &TaskContext, payload: &Value) -> Result<Vec<TaskCommand>> {
        self.log.lock().updates.push(payload.clone());
        if self.fail_update {
            return Err(MixKitError::Script("bad update".into()));
        }
        let commands: Vec<TaskCommand> = payload
            .get("commands")
            .cloned()
            .and_then(|c| serde_json::from_value(c).ok())
            .unwrap_or_default();
        Ok(commands)
    }

    fn process(&mut self, _ctx: &TaskContext) -> Result<Vec<TaskCommand>> {
        let mut log = self.log.lock();
        log.processes += 1;
        if self.fail_after_processes.is_some_and(|limit| log.processes >= limit) {
            return Err(MixKitError::Script("process step failed".into()));
        }
        drop(log);
        Ok(Vec::new())
    }

    fn stop(&mut self, _ctx: &TaskContext) {
        self.log.lock().stops += 1;
    }
}

#[derive(Default, Clone)]
pub(super) struct ScriptedFactory {
    pub log: Arc<Mutex<ScriptLog>>,
    pub on_start: Vec<TaskCommand>,
    pub fail_start: bool,
    pub fail_update: bool,
    pub fail_after_processes: Option<usize>,
}

impl ScriptedFactory {
    pub fn engine(&self) -> Box<dyn ScriptEngine> {
        Box::new(ScriptedEngine {
            log: Arc::clone(&self.log),
            on_start: self.on_start.clone(),
            fail_start: self.fail_start,
            fail_update: self.fail_update,
            fail_after_processes: self.fail_after_processes,
        })
    }
}

impl ScriptEngineFactory for ScriptedFactory {
    fn create(&self, _descriptor: &TaskDescriptor) -> Result<Box<dyn ScriptEngine>> {
        Ok(self.engine())
    }
}
