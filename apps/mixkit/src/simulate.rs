// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Drives the engine end to end with synthetic input.
//!
//! Every simulated task subscribes to its own set of input streams, each
//! carrying video and audio through the passthrough codec. A small built-in
//! mixing script pulls one time-aligned video frame per input on every
//! process step and publishes a composite packet to a counting sink.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mixkit_core::control::{TaskCommand, TaskDescriptor};
use mixkit_core::error::Result;
use mixkit_core::fanout::MediaSelector;
use mixkit_core::queue::TimeRefPop;
use mixkit_core::types::{CodecKind, FrameRole, MediaKind, MediaMeta, MediaPacket, TimeTrace};
use mixkit_engine::passthrough::{
    audio_header, video_header, PassthroughDecoderFactory, PassthroughResamplerFactory,
};
use mixkit_engine::{
    EngineServices, ScriptEngine, ScriptEngineFactory, TaskContext, TaskManager, TimeoutSweeper,
};

use crate::config::{Config, SimulateConfig};

/// What a simulation run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    /// Composite packets published across all tasks
    pub published: u64,
    /// Packets published per task id
    pub per_task: BTreeMap<String, u64>,
    /// Tasks removed by the timeout sweep before the run ended
    pub reclaimed: usize,
    /// Tasks still alive at the end and shut down
    pub stopped: usize,
}

/// Script that composites the newest aligned frame of every input.
struct GridScript {
    inputs: Vec<String>,
    started_at: u64,
    frames_out: u64,
}

impl GridScript {
    fn time_ref(&self, ctx: &TaskContext) -> u32 {
        u32::try_from(ctx.now_millis().saturating_sub(self.started_at)).unwrap_or(u32::MAX)
    }
}

fn commands_in(payload: &Value) -> Result<Vec<TaskCommand>> {
    match payload.get("commands") {
        Some(commands) => Ok(serde_json::from_value(commands.clone())?),
        None => Ok(Vec::new()),
    }
}

impl ScriptEngine for GridScript {
    fn start(&mut self, ctx: &TaskContext, payload: &Value) -> Result<Vec<TaskCommand>> {
        self.started_at = ctx.now_millis();
        self.inputs = payload["inputs"]
            .as_array()
            .map(|inputs| inputs.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let dimension = |key: &str| payload[key].as_u64().and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
        let mut commands: Vec<TaskCommand> = self
            .inputs
            .iter()
            .map(|stream| TaskCommand::Subscribe {
                stream_name: stream.clone(),
                subscriber: stream.clone(),
                media: vec![MediaSelector::VideoFrame, MediaSelector::AudioFrame],
            })
            .collect();
        commands.push(TaskCommand::ConfigureCodec {
            codec: CodecKind::H264,
            width: dimension("width"),
            height: dimension("height"),
            fps: dimension("fps"),
            kbps: 1500,
        });
        commands.extend(commands_in(payload)?);

        tracing::info!(task_id = %ctx.task_id(), inputs = ?self.inputs, "Grid script started");
        Ok(commands)
    }

    fn update(&mut self, _ctx: &TaskContext, payload: &Value) -> Result<Vec<TaskCommand>> {
        commands_in(payload)
    }

    fn process(&mut self, ctx: &TaskContext) -> Result<Vec<TaskCommand>> {
        let time_ref = self.time_ref(ctx);
        let mut composite = BytesMut::new();
        let mut trace = TimeTrace::default();
        let mut dts = None;

        for input in &self.inputs {
            let Some(target) = ctx.target(input) else {
                continue;
            };
            if let Some(audio) = target.audio_frames() {
                audio.clear();
            }
            let Some(video) = target.video_frames() else {
                continue;
            };
            let frame = match video.pop_by_given_time_ref(time_ref) {
                TimeRefPop::Normal(frame) | TimeRefPop::Tail(frame) => frame,
                TimeRefPop::Empty => continue,
            };
            composite.extend_from_slice(&frame.data);
            trace.merge(&frame.meta.trace);
            dts = dts.max(Some(frame.meta.dts));
        }

        if let Some(dts) = dts {
            let role = if self.frames_out == 0 { FrameRole::Key } else { FrameRole::Predicted };
            let mut meta = MediaMeta::new(MediaKind::Video, role, CodecKind::H264, dts);
            meta.trace = trace;
            meta.frame_id = self.frames_out;
            self.frames_out += 1;
            ctx.publish(MediaPacket::new(meta, composite.freeze()));
        }
        Ok(Vec::new())
    }

    fn stop(&mut self, ctx: &TaskContext) {
        tracing::info!(task_id = %ctx.task_id(), frames_out = self.frames_out, "Grid script stopped");
    }
}

struct GridScriptFactory;

impl ScriptEngineFactory for GridScriptFactory {
    fn create(&self, descriptor: &TaskDescriptor) -> Result<Box<dyn ScriptEngine>> {
        if let Some(file) = &descriptor.script_file {
            tracing::debug!(task_id = %descriptor.task_id, file = %file, "Ignoring script file, using built-in grid");
        }
        Ok(Box::new(GridScript { inputs: Vec::new(), started_at: 0, frames_out: 0 }))
    }
}

type PublishCounts = Arc<Mutex<BTreeMap<String, u64>>>;

/// One synthetic input stream.
struct Source {
    task_id: String,
    stream_name: String,
    stream_id: u64,
}

impl Source {
    fn packet(&self, kind: MediaKind, role: FrameRole, dts: u32, payload: Bytes) -> MediaPacket {
        let codec = if kind == MediaKind::Video { CodecKind::H264 } else { CodecKind::Aac };
        let meta = MediaMeta::new(kind, role, codec, dts).with_stream(self.stream_id, self.stream_name.clone());
        MediaPacket::new(meta, payload)
    }
}

fn task_payload(task_id: &str, inputs: &[String], sim: &SimulateConfig) -> Value {
    json!({
        "task_id": task_id,
        "task_type": "script",
        "task_file": "grid.lua",
        "output_stream": { "streamname": format!("{task_id}-mix") },
        "inputs": inputs,
        "width": sim.width,
        "height": sim.height,
        "fps": sim.fps,
    })
}

fn elapsed_millis(start: Instant) -> u32 {
    u32::try_from(start.elapsed().as_millis()).unwrap_or(u32::MAX)
}

/// Runs the simulation described by `config.simulate` and returns what it produced.
///
/// # Errors
///
/// Fails if the engine cannot be initialised or a task cannot be started.
pub fn run(config: &Config) -> anyhow::Result<SimulationReport> {
    let sim = &config.simulate;
    let engine_config = config.engine.to_engine_config();
    let sweep_interval = engine_config.sweep_interval;

    let counts: PublishCounts = Arc::new(Mutex::new(BTreeMap::new()));
    let sink = {
        let counts = Arc::clone(&counts);
        move |task_id: &str, _stream_name: &str, _packet: MediaPacket| {
            *counts.lock().entry(task_id.to_string()).or_default() += 1;
        }
    };

    let manager = Arc::new(TaskManager::new(engine_config));
    let services = EngineServices::new(
        Arc::new(PassthroughDecoderFactory),
        Arc::new(PassthroughResamplerFactory),
        Arc::new(GridScriptFactory),
        &config.engine.resource_root,
    )
    .with_sink(Arc::new(sink));
    manager.init(services)?;
    let sweeper = TimeoutSweeper::spawn(Arc::clone(&manager), sweep_interval)?;

    let mut sources = Vec::new();
    let mut task_ids = Vec::new();
    for task in 0..sim.tasks {
        let task_id = format!("sim-{task}");
        let inputs: Vec<String> = (0..sim.streams).map(|s| format!("{task_id}-cam-{s}")).collect();
        manager.add_task(task_payload(&task_id, &inputs, sim))?;
        for (index, stream_name) in inputs.into_iter().enumerate() {
            sources.push(Source { task_id: task_id.clone(), stream_name, stream_id: u64::try_from(task * 100 + index).unwrap_or_default() });
        }
        task_ids.push(task_id);
    }

    let video_config = video_header(sim.width, sim.height);
    let audio_config = audio_header(sim.sample_rate, 2);
    let frame_interval = Duration::from_millis(1000 / u64::from(sim.fps.max(1)));
    let samples_per_frame = usize::try_from(sim.sample_rate / sim.fps.max(1)).unwrap_or_default();
    let audio_payload = Bytes::from(vec![0u8; samples_per_frame * 2 * 2]);
    let keyframe_every = u64::from(sim.fps.max(1));

    let start = Instant::now();
    for source in &sources {
        manager.route_encoded_unit(&source.task_id, source.packet(MediaKind::Video, FrameRole::Header, 0, video_config.clone()));
        manager.route_encoded_unit(&source.task_id, source.packet(MediaKind::Audio, FrameRole::Header, 0, audio_config.clone()));
    }

    let deadline = start + Duration::from_secs(sim.duration_secs);
    let keepalive = Duration::from_millis(sim.keepalive_ms.max(1));
    let mut next_keepalive = start;
    let mut tick = 0u64;
    while Instant::now() < deadline {
        if Instant::now() >= next_keepalive {
            for (index, task_id) in task_ids.iter().enumerate() {
                if !sim.idle_tasks.contains(&index) {
                    manager.update(json!({ "task_id": task_id, "keepalive": tick }));
                }
            }
            next_keepalive += keepalive;
        }

        let dts = elapsed_millis(start).max(1);
        for source in &sources {
            let pattern = Bytes::from(vec![u8::try_from(source.stream_id % 251).unwrap_or_default(); 64]);
            let video = if tick % keyframe_every == 0 {
                source.packet(MediaKind::Video, FrameRole::Key, dts, pattern).with_global_header(video_config.clone())
            } else {
                source.packet(MediaKind::Video, FrameRole::Predicted, dts, pattern)
            };
            manager.route_encoded_unit(&source.task_id, video);
            manager.route_encoded_unit(
                &source.task_id,
                source.packet(MediaKind::Audio, FrameRole::Key, dts, audio_payload.clone()),
            );
        }
        tick += 1;

        let next = start + frame_interval.saturating_mul(u32::try_from(tick).unwrap_or(u32::MAX));
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    let reclaimed = task_ids.len().saturating_sub(manager.task_count());
    sweeper.stop();
    let stopped = manager.shutdown_all();

    let per_task = counts.lock().clone();
    let published = per_task.values().sum();
    Ok(SimulationReport { published, per_task, reclaimed, stopped })
}
