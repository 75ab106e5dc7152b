// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Decode and resample stage behaviour.

use bytes::Bytes;
use std::sync::Arc;

use mixkit_core::clock::system_clock;
use mixkit_core::fanout::FanoutTarget;
use mixkit_core::queue::PopTimeout;
use mixkit_core::queue_config::QueueConfig;
use mixkit_core::types::{CodecKind, FrameRole, MediaFrame, MediaKind, MediaMeta};

use super::{fast_config, init_tracing, packet, video_config, video_frame, wait_until, WAIT};
use crate::config::EngineConfig;
use crate::passthrough::{video_header, PassthroughDecoderFactory, PassthroughResamplerFactory};
use crate::stage::{StageContext, StageRole};

fn video_stage(config: &EngineConfig) -> StageContext {
    match StageContext::spawn_decoder(
        "cam",
        MediaKind::Video,
        CodecKind::H264,
        &PassthroughDecoderFactory,
        config,
        system_clock(),
    ) {
        Ok(stage) => stage,
        Err(e) => panic!("Failed to spawn decode stage: {e}"),
    }
}

fn video_target(name: &str) -> Arc<FanoutTarget> {
    let target = Arc::new(FanoutTarget::new(name, QueueConfig::default()));
    target.subscribe_video_frames();
    target
}

fn video_frames_len(target: &FanoutTarget) -> usize {
    target.video_frames().map_or(0, |q| q.len())
}

#[test]
fn frames_before_first_header_are_discarded() {
    init_tracing();
    let stage = video_stage(&fast_config());
    let target = video_target("mixer");
    stage.add_subscriber("mixer", Arc::clone(&target));

    assert!(stage.push_packet(video_frame("cam", 1)));
    assert!(wait_until(WAIT, || stage.stats().discarded == 1));
    assert!(!stage.is_ready());
    assert_eq!(video_frames_len(&target), 0);

    assert!(stage.push_packet(video_config("cam", 2)));
    assert!(stage.push_packet(video_frame("cam", 3)));
    assert!(wait_until(WAIT, || video_frames_len(&target) == 1));
    assert!(stage.is_ready());

    let Some(frame) = target.video_frames().and_then(|q| q.pop(PopTimeout::NonBlocking)) else {
        panic!("expected a decoded frame");
    };
    assert_eq!(frame.meta.dts, 3);
    assert_eq!(frame.meta.codec, CodecKind::Raw);
    assert_eq!((frame.width, frame.height), (320, 240));
}

#[test]
fn identical_header_does_not_reconfigure() {
    init_tracing();
    let stage = video_stage(&fast_config());

    stage.push_packet(video_config("cam", 1));
    stage.push_packet(video_config("cam", 2));
    stage.push_packet(video_frame("cam", 3));
    assert!(wait_until(WAIT, || stage.stats().received == 3));
    assert_eq!(stage.stats().configured, 1);

    let changed = packet("cam", MediaKind::Video, FrameRole::Header, 4, &video_header(640, 480));
    stage.push_packet(changed);
    assert!(wait_until(WAIT, || stage.stats().configured == 2));
    assert!(stage.is_ready());
}

#[test]
fn rejected_header_leaves_stage_not_ready() {
    init_tracing();
    let stage = video_stage(&fast_config());

    stage.push_packet(packet("cam", MediaKind::Video, FrameRole::Header, 1, b"x"));
    stage.push_packet(video_frame("cam", 2));
    assert!(wait_until(WAIT, || stage.stats().received == 2));

    let stats = stage.stats();
    assert_eq!(stats.errored, 1);
    assert_eq!(stats.discarded, 1);
    assert!(!stage.is_ready());
}

#[test]
fn repeated_decode_failures_drop_configuration() {
    init_tracing();
    let config = EngineConfig { max_consecutive_decode_failures: 3, ..fast_config() };
    let stage = video_stage(&config);

    stage.push_packet(video_config("cam", 1));
    for dts in 2..5 {
        stage.push_packet(packet("cam", MediaKind::Video, FrameRole::Predicted, dts, b""));
    }
    stage.push_packet(video_frame("cam", 5));
    assert!(wait_until(WAIT, || stage.stats().received == 5));

    let stats = stage.stats();
    assert_eq!(stats.errored, 3);
    assert_eq!(stats.discarded, 1);
    assert!(!stage.is_ready());

    // A fresh header brings the stage back.
    stage.push_packet(video_config("cam", 6));
    assert!(wait_until(WAIT, || stage.is_ready()));
}

#[test]
fn add_subscriber_replaces_same_name() {
    init_tracing();
    let stage = video_stage(&fast_config());
    let first = video_target("first");
    let second = video_target("second");

    stage.add_subscriber("mixer", Arc::clone(&first));
    stage.add_subscriber("mixer", Arc::clone(&second));
    assert_eq!(stage.subscriber_count(), 1);
    assert!(stage.subscriber("mixer").is_some_and(|t| Arc::ptr_eq(&t, &second)));

    stage.push_packet(video_config("cam", 1));
    stage.push_packet(video_frame("cam", 2));
    assert!(wait_until(WAIT, || video_frames_len(&second) == 1));
    assert_eq!(video_frames_len(&first), 0);
}

#[test]
fn removed_subscriber_receives_nothing_more() {
    init_tracing();
    let stage = video_stage(&fast_config());
    let leaving = video_target("leaving");
    let staying = video_target("staying");
    stage.add_subscriber("leaving", Arc::clone(&leaving));
    stage.add_subscriber("staying", Arc::clone(&staying));

    stage.push_packet(video_config("cam", 1));
    stage.push_packet(video_frame("cam", 2));
    assert!(wait_until(WAIT, || video_frames_len(&staying) == 1));
    assert_eq!(video_frames_len(&leaving), 1);

    assert!(stage.del_subscriber("leaving"));
    assert!(!stage.del_subscriber("leaving"));

    stage.push_packet(video_frame("cam", 3));
    stage.push_packet(video_frame("cam", 4));
    assert!(wait_until(WAIT, || video_frames_len(&staying) == 3));
    assert_eq!(video_frames_len(&leaving), 1);
    assert_eq!(stage.stats().sent, 4);
}

#[test]
fn join_is_idempotent() {
    let stage = video_stage(&fast_config());
    assert_eq!(stage.role(), StageRole::Decode);
    stage.request_stop();
    assert!(stage.join());
    assert!(stage.join());
}

#[test]
fn resample_stage_rechunks_audio() {
    init_tracing();
    let config = fast_config();
    let stage = match StageContext::spawn_resampler(
        "mic",
        Arc::new(PassthroughResamplerFactory),
        &config,
        system_clock(),
    ) {
        Ok(stage) => stage,
        Err(e) => panic!("Failed to spawn resample stage: {e}"),
    };
    assert_eq!(stage.role(), StageRole::Resample);

    let out = Arc::new(FanoutTarget::new("mixer", QueueConfig::default()));
    out.subscribe_audio_frames();
    stage.add_subscriber("mixer", Arc::clone(&out));

    let frame_bytes = config.resample_output.frame_bytes();
    let meta = MediaMeta::new(MediaKind::Audio, FrameRole::Key, CodecKind::Raw, 100)
        .with_stream(7, "mic")
        .with_audio_format(48_000, 2);
    let frame = MediaFrame::new(meta, Bytes::from(vec![0u8; frame_bytes * 2 + 10]));

    let Some(ingress) = stage.ingress_target() else {
        panic!("resample stage has no ingress target");
    };
    assert!(ingress.push_frame(Arc::new(frame)));

    let Some(queue) = out.audio_frames() else {
        panic!("audio frames not enabled");
    };
    assert!(wait_until(WAIT, || queue.len() == 2));

    let first = queue.pop(PopTimeout::NonBlocking);
    let second = queue.pop(PopTimeout::NonBlocking);
    let (Some(first), Some(second)) = (first, second) else {
        panic!("expected two resampled frames");
    };
    assert_eq!(first.meta.dts, 100);
    assert_eq!(second.meta.dts, 100 + 1024 * 1000 / 44_100);
    assert_eq!(first.meta.sample_rate, 44_100);
    assert_eq!(first.data.len(), frame_bytes);
}
