// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end task lifecycle: a relay script subscribes to one input stream,
//! republishes every decoded video frame and is reclaimed after going idle.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mixkit_core::clock::{Clock, ManualClock};
use mixkit_core::control::{TaskCommand, TaskDescriptor};
use mixkit_core::error::Result;
use mixkit_core::fanout::MediaSelector;
use mixkit_core::queue::PopTimeout;
use mixkit_core::state::{TaskState, TaskStopReason};
use mixkit_core::types::{CodecKind, FrameRole, MediaKind, MediaMeta, MediaPacket, TimeTraceKey};
use mixkit_engine::passthrough::{
    video_header, PassthroughDecoderFactory, PassthroughResamplerFactory,
};
use mixkit_engine::{EngineConfig, EngineServices, ScriptEngine, ScriptEngineFactory, TaskContext, TaskManager};

struct Relay;

impl ScriptEngine for Relay {
    fn start(&mut self, _ctx: &TaskContext, payload: &Value) -> Result<Vec<TaskCommand>> {
        let stream_name = payload["input"].as_str().unwrap_or("cam").to_string();
        Ok(vec![TaskCommand::Subscribe {
            stream_name,
            subscriber: "relay".into(),
            media: vec![MediaSelector::VideoFrame],
        }])
    }

    fn update(&mut self, _ctx: &TaskContext, _payload: &Value) -> Result<Vec<TaskCommand>> {
        Ok(Vec::new())
    }

    fn process(&mut self, ctx: &TaskContext) -> Result<Vec<TaskCommand>> {
        let Some(queue) = ctx.target("relay") else {
            return Ok(Vec::new());
        };
        while let Some(frame) = queue.video_frames().and_then(|q| q.pop(PopTimeout::NonBlocking)) {
            let meta = MediaMeta::new(MediaKind::Video, FrameRole::Key, CodecKind::H264, frame.meta.dts);
            ctx.publish(MediaPacket::new(meta, frame.data.clone()));
        }
        Ok(Vec::new())
    }

    fn stop(&mut self, _ctx: &TaskContext) {}
}

struct RelayFactory;

impl ScriptEngineFactory for RelayFactory {
    fn create(&self, _descriptor: &TaskDescriptor) -> Result<Box<dyn ScriptEngine>> {
        Ok(Box::new(Relay))
    }
}

type Published = Arc<Mutex<Vec<(String, String, MediaPacket)>>>;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn video(stream: &str, role: FrameRole, dts: u32, payload: bytes::Bytes) -> MediaPacket {
    let meta = MediaMeta::new(MediaKind::Video, role, CodecKind::H264, dts).with_stream(3, stream);
    MediaPacket::new(meta, payload)
}

#[test]
#[allow(clippy::expect_used)]
fn relay_task_publishes_and_is_reclaimed() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let published: Published = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let published = Arc::clone(&published);
        move |task_id: &str, stream_name: &str, packet: MediaPacket| {
            published.lock().push((task_id.to_string(), stream_name.to_string(), packet));
        }
    };
    let clock = Arc::new(ManualClock::new(50_000));

    let config = EngineConfig {
        initial_payload_wait: Duration::from_millis(10),
        update_poll: Duration::from_millis(2),
        ..EngineConfig::default()
    };
    let manager = TaskManager::new(config);
    let services = EngineServices::new(
        Arc::new(PassthroughDecoderFactory),
        Arc::new(PassthroughResamplerFactory),
        Arc::new(RelayFactory),
        "assets",
    )
    .with_sink(Arc::new(sink))
    .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
    manager.init(services).expect("init");

    let task_id = manager
        .add_task(json!({
            "task_id": "relay-1",
            "task_type": "lua",
            "output_stream": { "streamname": "mix-out" },
            "input": "cam"
        }))
        .expect("add_task");
    let task = manager.find_task(&task_id).expect("task registered");
    assert!(wait_until(Duration::from_secs(5), || task.state() == TaskState::Running));

    assert!(manager.route_encoded_unit(&task_id, video("cam", FrameRole::Header, 0, video_header(64, 64))));
    for dts in 1..=5u32 {
        let payload = bytes::Bytes::from(vec![u8::try_from(dts).expect("small"); 16]);
        assert!(manager.route_encoded_unit(&task_id, video("cam", FrameRole::Predicted, dts * 40, payload)));
    }
    // Streams nobody subscribed to still get a stage.
    assert!(manager.route_encoded_unit(&task_id, video("other", FrameRole::Header, 0, video_header(8, 8))));

    assert!(wait_until(Duration::from_secs(5), || published.lock().len() == 5));
    {
        let published = published.lock();
        let dts: Vec<u32> = published.iter().map(|(_, _, p)| p.meta.dts).collect();
        assert_eq!(dts, vec![40, 80, 120, 160, 200]);
        for (task, stream, packet) in published.iter() {
            assert_eq!(task, "relay-1");
            assert_eq!(stream, "mix-out");
            assert_eq!(packet.meta.stream_name, "mix-out");
            assert!(packet.meta.trace.get(0, TimeTraceKey::Send).is_some());
        }
    }
    assert_eq!(task.pipeline().stream_names(), vec!["cam".to_string(), "other".to_string()]);

    clock.advance(10_001);
    assert_eq!(manager.check_timeout_tasks(), 1);
    assert_eq!(task.state(), TaskState::Stopped(TaskStopReason::TimedOut));
    assert_eq!(task.pipeline().stage_count(), 0);
    assert!(!task.context().publish(video("late", FrameRole::Key, 1, bytes::Bytes::from_static(b"x"))));
    assert_eq!(published.lock().len(), 5);
}
