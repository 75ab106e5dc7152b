// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-consumer bundle of timestamp queues.
//!
//! A [`FanoutTarget`] is the unit of subscription: a producer stage holds an
//! `Arc` to it and pushes into whichever of its four queues the consumer has
//! enabled. Queues are created lazily on first enable and live as long as the
//! target does, independently of the producers that feed it.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

use crate::clock::{system_clock, Clock};
use crate::queue::TimestampQueue;
use crate::queue_config::QueueConfig;
use crate::types::{MediaKind, SharedFrame, SharedPacket};

/// Which of a target's queues a consumer wants filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSelector {
    VideoPacket,
    AudioPacket,
    VideoFrame,
    AudioFrame,
}

type FrameQueue = Arc<TimestampQueue<SharedFrame>>;
type PacketQueue = Arc<TimestampQueue<SharedPacket>>;

#[derive(Debug)]
pub struct FanoutTarget {
    name: String,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    video_packets: OnceLock<PacketQueue>,
    audio_packets: OnceLock<PacketQueue>,
    video_frames: OnceLock<FrameQueue>,
    audio_frames: OnceLock<FrameQueue>,
}

impl FanoutTarget {
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    pub fn with_clock(name: impl Into<String>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            video_packets: OnceLock::new(),
            audio_packets: OnceLock::new(),
            video_frames: OnceLock::new(),
            audio_frames: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn make_queue<T: crate::queue::QueueItem>(&self, suffix: &str) -> Arc<TimestampQueue<T>> {
        Arc::new(TimestampQueue::with_clock(
            format!("{}.{suffix}", self.name),
            self.config,
            Arc::clone(&self.clock),
        ))
    }

    /// Enables the queue for `selector`. Idempotent.
    pub fn enable(&self, selector: MediaSelector) {
        match selector {
            MediaSelector::VideoPacket => {
                self.subscribe_video_packets();
            },
            MediaSelector::AudioPacket => {
                self.subscribe_audio_packets();
            },
            MediaSelector::VideoFrame => {
                self.subscribe_video_frames();
            },
            MediaSelector::AudioFrame => {
                self.subscribe_audio_frames();
            },
        }
    }

    pub fn subscribe_video_packets(&self) -> PacketQueue {
        Arc::clone(self.video_packets.get_or_init(|| self.make_queue("video_packets")))
    }

    pub fn subscribe_audio_packets(&self) -> PacketQueue {
        Arc::clone(self.audio_packets.get_or_init(|| self.make_queue("audio_packets")))
    }

    pub fn subscribe_video_frames(&self) -> FrameQueue {
        Arc::clone(self.video_frames.get_or_init(|| self.make_queue("video_frames")))
    }

    pub fn subscribe_audio_frames(&self) -> FrameQueue {
        Arc::clone(self.audio_frames.get_or_init(|| self.make_queue("audio_frames")))
    }

    pub fn video_packets(&self) -> Option<&TimestampQueue<SharedPacket>> {
        self.video_packets.get().map(AsRef::as_ref)
    }

    pub fn audio_packets(&self) -> Option<&TimestampQueue<SharedPacket>> {
        self.audio_packets.get().map(AsRef::as_ref)
    }

    pub fn video_frames(&self) -> Option<&TimestampQueue<SharedFrame>> {
        self.video_frames.get().map(AsRef::as_ref)
    }

    pub fn audio_frames(&self) -> Option<&TimestampQueue<SharedFrame>> {
        self.audio_frames.get().map(AsRef::as_ref)
    }

    pub fn is_enabled(&self, selector: MediaSelector) -> bool {
        match selector {
            MediaSelector::VideoPacket => self.video_packets.get().is_some(),
            MediaSelector::AudioPacket => self.audio_packets.get().is_some(),
            MediaSelector::VideoFrame => self.video_frames.get().is_some(),
            MediaSelector::AudioFrame => self.audio_frames.get().is_some(),
        }
    }

    /// Pushes a decoded frame into the matching frame queue, keyed by dts.
    ///
    /// Returns `false` when the consumer has not enabled that queue or the
    /// queue rejected the key.
    pub fn push_frame(&self, frame: SharedFrame) -> bool {
        let queue = match frame.meta.kind {
            MediaKind::Video => self.video_frames(),
            MediaKind::Audio => self.audio_frames(),
            MediaKind::App | MediaKind::Data => None,
        };
        queue.is_some_and(|q| q.push(frame.meta.dts, frame))
    }

    /// Pushes an encoded packet into the matching packet queue, keyed by dts.
    pub fn push_packet(&self, packet: SharedPacket) -> bool {
        let queue = match packet.meta.kind {
            MediaKind::Video => self.video_packets(),
            MediaKind::Audio => self.audio_packets(),
            MediaKind::App | MediaKind::Data => None,
        };
        queue.is_some_and(|q| q.push(packet.meta.dts, packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::PopTimeout;
    use crate::types::{CodecKind, FrameRole, MediaFrame, MediaMeta, MediaPacket};
    use bytes::Bytes;

    fn frame(kind: MediaKind, dts: u32) -> SharedFrame {
        Arc::new(MediaFrame::new(
            MediaMeta::new(kind, FrameRole::Key, CodecKind::Raw, dts),
            Bytes::from_static(b"px"),
        ))
    }

    #[test]
    fn queues_are_created_lazily() {
        let target = FanoutTarget::new("mixer", QueueConfig::default());
        assert!(!target.is_enabled(MediaSelector::VideoFrame));
        assert!(target.video_frames().is_none());

        target.enable(MediaSelector::VideoFrame);
        target.enable(MediaSelector::VideoFrame);
        assert!(target.is_enabled(MediaSelector::VideoFrame));
        assert!(!target.is_enabled(MediaSelector::AudioFrame));
        assert_eq!(target.video_frames().map(TimestampQueue::name), Some("mixer.video_frames"));
    }

    #[test]
    fn frames_route_by_kind_and_only_to_enabled_queues() {
        let target = FanoutTarget::new("mixer", QueueConfig::default());
        let video = target.subscribe_video_frames();

        assert!(target.push_frame(frame(MediaKind::Video, 40)));
        assert!(!target.push_frame(frame(MediaKind::Audio, 40)));

        let popped = video.pop(PopTimeout::NonBlocking);
        assert_eq!(popped.map(|f| f.meta.dts), Some(40));
    }

    #[test]
    fn packets_share_the_payload() {
        let target = FanoutTarget::new("recorder", QueueConfig::default());
        target.enable(MediaSelector::AudioPacket);

        let meta = MediaMeta::new(MediaKind::Audio, FrameRole::Key, CodecKind::Aac, 21);
        let packet = Arc::new(MediaPacket::new(meta, Bytes::from_static(b"aac")));
        assert!(target.push_packet(Arc::clone(&packet)));

        let Some(popped) = target.audio_packets().and_then(|q| q.pop(PopTimeout::NonBlocking)) else {
            panic!("expected the pushed packet");
        };
        assert!(Arc::ptr_eq(&popped, &packet));
    }
}
