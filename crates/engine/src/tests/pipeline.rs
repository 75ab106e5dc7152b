// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stream pipeline: lazy stages, pending subscriptions and teardown.

use std::sync::Arc;

use mixkit_core::fanout::FanoutTarget;
use mixkit_core::queue::PopTimeout;
use mixkit_core::queue_config::QueueConfig;
use mixkit_core::types::{FrameRole, MediaKind, MediaPacket};

use super::{
    audio_config, fast_config, init_tracing, packet, services, video_config, video_frame, wait_until,
    ScriptedFactory, WAIT,
};
use crate::pipeline::{StreamPipeline, RESAMPLE_SUBSCRIBER};
use crate::stage::StageRole;

fn pipeline() -> StreamPipeline {
    StreamPipeline::new(
        "task-1",
        Arc::new(fast_config()),
        Arc::new(services(Arc::new(ScriptedFactory::default()))),
    )
}

fn frame_target(name: &str) -> Arc<FanoutTarget> {
    let target = Arc::new(FanoutTarget::new(name, QueueConfig::default()));
    target.subscribe_video_frames();
    target.subscribe_audio_frames();
    target
}

#[test]
fn subscription_before_first_unit_is_applied_on_creation() {
    init_tracing();
    let pipeline = pipeline();
    let target = frame_target("mixer");
    pipeline.subscribe("cam", "mixer", Arc::clone(&target));
    assert_eq!(pipeline.stage_count(), 0);

    assert!(pipeline.route_unit(video_config("cam", 1)));
    for dts in [2, 3, 4] {
        assert!(pipeline.route_unit(video_frame("cam", dts)));
    }

    let Some(chain) = pipeline.stage("cam", MediaKind::Video) else {
        panic!("stage for cam was not created");
    };
    assert!(chain.output().subscriber("mixer").is_some());

    let Some(queue) = target.video_frames() else {
        panic!("video frames not enabled");
    };
    assert!(wait_until(WAIT, || queue.len() == 3));

    // The header took frame id 1.
    let ids: Vec<u64> = std::iter::from_fn(|| queue.pop(PopTimeout::NonBlocking))
        .map(|frame| frame.meta.frame_id)
        .collect();
    assert_eq!(ids, vec![2, 3, 4]);
}

#[test]
fn subscription_after_creation_attaches_immediately() {
    init_tracing();
    let pipeline = pipeline();
    assert!(pipeline.route_unit(video_config("cam", 1)));

    let target = frame_target("late");
    pipeline.subscribe("cam", "late", Arc::clone(&target));
    assert!(pipeline.route_unit(video_frame("cam", 2)));

    assert!(wait_until(WAIT, || target.video_frames().is_some_and(|q| q.len() == 1)));
}

#[test]
fn audio_goes_through_resample_stage() {
    init_tracing();
    let pipeline = pipeline();
    let target = frame_target("mixer");
    pipeline.subscribe("mic", "mixer", Arc::clone(&target));

    assert!(pipeline.route_unit(audio_config("mic", 10)));
    let Some(chain) = pipeline.stage("mic", MediaKind::Audio) else {
        panic!("audio stage missing");
    };
    assert_eq!(chain.entry().role(), StageRole::Decode);
    assert_eq!(chain.output().role(), StageRole::Resample);
    assert!(chain.entry().subscriber(RESAMPLE_SUBSCRIBER).is_some());
    assert!(chain.output().subscriber("mixer").is_some());

    let frame_bytes = fast_config().resample_output.frame_bytes();
    let pcm = vec![0u8; frame_bytes * 3];
    assert!(pipeline.route_unit(packet("mic", MediaKind::Audio, FrameRole::Key, 11, &pcm)));

    let Some(queue) = target.audio_frames() else {
        panic!("audio frames not enabled");
    };
    assert!(wait_until(WAIT, || queue.len() == 3));
    let Some(first) = queue.pop(PopTimeout::NonBlocking) else {
        panic!("no resampled frame");
    };
    assert_eq!(first.meta.sample_rate, 44_100);
    assert_eq!(first.meta.channels, 2);
    assert_eq!(first.meta.stream_name, "mic");
}

#[test]
fn non_media_and_orphan_markers_create_nothing() {
    let pipeline = pipeline();
    assert!(!pipeline.route_unit(packet("cam", MediaKind::Data, FrameRole::Key, 1, b"meta")));
    assert!(!pipeline.route_unit(MediaPacket::clean_queue_marker(MediaKind::Video, 5)));
    assert_eq!(pipeline.stage_count(), 0);
}

#[test]
fn streams_get_one_chain_per_media_kind() {
    let pipeline = pipeline();
    assert!(pipeline.route_unit(video_config("a", 1)));
    assert!(pipeline.route_unit(video_config("b", 1)));
    assert!(pipeline.route_unit(audio_config("a", 1)));
    assert!(pipeline.route_unit(video_frame("a", 2)));

    assert_eq!(pipeline.stage_count(), 3);
    assert_eq!(pipeline.stream_names(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn unsubscribe_removes_pending_and_applied() {
    let pipeline = pipeline();
    pipeline.subscribe("cam", "mixer", frame_target("mixer"));
    assert!(pipeline.unsubscribe("cam", "mixer"));
    assert!(!pipeline.unsubscribe("cam", "mixer"));

    pipeline.subscribe("cam", "mixer", frame_target("mixer"));
    assert!(pipeline.route_unit(video_config("cam", 1)));
    let Some(chain) = pipeline.stage("cam", MediaKind::Video) else {
        panic!("stage missing");
    };
    assert_eq!(chain.output().subscriber_count(), 1);

    assert!(pipeline.unsubscribe("cam", "mixer"));
    assert_eq!(chain.output().subscriber_count(), 0);
}

#[test]
fn teardown_is_idempotent_and_final() {
    init_tracing();
    let pipeline = pipeline();
    assert!(pipeline.route_unit(video_config("cam", 1)));
    assert!(pipeline.route_unit(audio_config("mic", 1)));

    assert_eq!(pipeline.teardown_all(), 2);
    assert!(pipeline.is_torn_down());
    assert_eq!(pipeline.stage_count(), 0);

    assert_eq!(pipeline.teardown_all(), 0);
    assert!(!pipeline.route_unit(video_frame("cam", 2)));
    assert_eq!(pipeline.stage_count(), 0);
}
