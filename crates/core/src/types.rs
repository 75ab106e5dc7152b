// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types that flow through MixKit pipelines.
//!
//! This module defines the media units exchanged between stages:
//! - [`MediaPacket`]: an encoded unit as it arrives from an input stream
//! - [`MediaFrame`]: a decoded unit (pixel planes or PCM) produced by a stage
//! - [`MediaMeta`]: the attributes both share (kind, role, codec, timestamps, ids)
//! - [`TimeTrace`]: per-source latency accounting stamped along the pipeline
//!
//! Payloads are [`bytes::Bytes`] handles. Cloning a unit clones the handle, not
//! the buffer, and the buffer is released when the last holder drops it. Once a
//! unit has been forwarded it is treated as immutable by every holder.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::CodecHeader;

/// What a unit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    /// Application data carried alongside the media (script payloads, metadata).
    App,
    Data,
}

impl MediaKind {
    /// Tag value used by the container framing.
    pub const fn code(self) -> u8 {
        match self {
            Self::Video => 1,
            Self::Audio => 2,
            Self::App => 10,
            Self::Data => 11,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Video),
            2 => Some(Self::Audio),
            10 => Some(Self::App),
            11 => Some(Self::Data),
            _ => None,
        }
    }

    /// Whether units of this kind go through a decode stage.
    pub const fn is_decodable(self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }
}

/// Role of a unit within its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameRole {
    /// Intra-coded (key) frame.
    Key,
    Predicted,
    Bidirectional,
    /// Decoder configuration unit. Consumed by the stage, never forwarded.
    Header,
    /// Sentinel that resets a queue's rollback and time-reference tracking.
    CleanQueue,
}

impl FrameRole {
    pub const fn code(self) -> u8 {
        match self {
            Self::Key => 1,
            Self::Predicted => 2,
            Self::Bidirectional => 3,
            Self::Header => 4,
            Self::CleanQueue => 10,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Key),
            2 => Some(Self::Predicted),
            3 => Some(Self::Bidirectional),
            4 => Some(Self::Header),
            10 => Some(Self::CleanQueue),
            _ => None,
        }
    }
}

/// Codec of the encoded payload. `Raw` marks already-decoded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    H264,
    H265,
    Aac,
    OggOpus,
    Raw,
}

impl CodecKind {
    pub const fn code(self) -> u8 {
        match self {
            Self::H264 => 7,
            Self::OggOpus => 9,
            Self::Aac => 10,
            Self::H265 => 12,
            Self::Raw => 0,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            7 => Some(Self::H264),
            9 => Some(Self::OggOpus),
            10 => Some(Self::Aac),
            12 => Some(Self::H265),
            0 => Some(Self::Raw),
            _ => None,
        }
    }
}

/// Points along the pipeline where a unit gets a timestamp.
///
/// Declaration order is pipeline order; [`TimeTrace::render`] relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeTraceKey {
    Recv,
    Deliver,
    Decode,
    Mixed,
    Encode,
    Send,
}

impl TimeTraceKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recv => "recv",
            Self::Deliver => "deliver",
            Self::Decode => "decode",
            Self::Mixed => "mixed",
            Self::Encode => "encode",
            Self::Send => "send",
        }
    }
}

/// Per-source latency accounting: source id -> step -> wall clock millis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTrace {
    steps: BTreeMap<u64, BTreeMap<TimeTraceKey, u64>>,
}

impl TimeTrace {
    pub fn record(&mut self, source_id: u64, key: TimeTraceKey, at_millis: u64) {
        self.steps.entry(source_id).or_default().insert(key, at_millis);
    }

    pub fn get(&self, source_id: u64, key: TimeTraceKey) -> Option<u64> {
        self.steps.get(&source_id).and_then(|steps| steps.get(&key)).copied()
    }

    /// Adds every step of `other`, overwriting steps both traces share.
    pub fn merge(&mut self, other: &Self) {
        for (source, steps) in &other.steps {
            let entry = self.steps.entry(*source).or_default();
            for (key, at) in steps {
                entry.insert(*key, *at);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = u64> + '_ {
        self.steps.keys().copied()
    }

    /// Renders the trace as `id:(recv->t0,decode->t1(+d)), elapse:d` per source,
    /// sources separated by `; `.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (source, steps) in &self.steps {
            if !out.is_empty() {
                out.push_str("; ");
            }
            let _ = write!(out, "{source}:(");
            let mut first: Option<u64> = None;
            let mut prev: Option<u64> = None;
            for (i, (key, at)) in steps.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}->{at}", key.as_str());
                if let Some(p) = prev {
                    let _ = write!(out, "(+{})", at.saturating_sub(p));
                }
                first.get_or_insert(*at);
                prev = Some(*at);
            }
            let elapse = match (first, prev) {
                (Some(f), Some(l)) => l.saturating_sub(f),
                _ => 0,
            };
            let _ = write!(out, "), elapse:{elapse}");
        }
        out
    }
}

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique unit id.
pub fn next_unit_id() -> u64 {
    NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Attributes shared by packets and frames.
///
/// `dts` is only comparable between units of the same `stream_id`. A stream may
/// restart with smaller values; queues handle that as rollback, not as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMeta {
    pub kind: MediaKind,
    pub role: FrameRole,
    pub codec: CodecKind,
    pub dts: u32,
    pub pts: u32,
    /// Process-wide unique id, assigned at construction.
    pub uid: u64,
    /// Per-stream sequence number, assigned when the unit is routed.
    pub frame_id: u64,
    pub stream_id: u64,
    pub stream_name: String,
    /// Audio only.
    pub sample_rate: u32,
    /// Audio only.
    pub channels: u16,
    /// Source id -> source-side timestamp, for cross-stream alignment.
    pub source_timestamps: BTreeMap<u64, u32>,
    pub trace: TimeTrace,
}

impl MediaMeta {
    pub fn new(kind: MediaKind, role: FrameRole, codec: CodecKind, dts: u32) -> Self {
        Self {
            kind,
            role,
            codec,
            dts,
            pts: dts,
            uid: next_unit_id(),
            frame_id: 0,
            stream_id: 0,
            stream_name: String::new(),
            sample_rate: 0,
            channels: 0,
            source_timestamps: BTreeMap::new(),
            trace: TimeTrace::default(),
        }
    }

    #[must_use]
    pub fn with_stream(mut self, stream_id: u64, stream_name: impl Into<String>) -> Self {
        self.stream_id = stream_id;
        self.stream_name = stream_name.into();
        self
    }

    #[must_use]
    pub const fn with_audio_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    pub fn is_key(&self) -> bool {
        self.role == FrameRole::Key
    }

    pub fn is_header(&self) -> bool {
        self.role == FrameRole::Header
    }

    pub fn is_clean_queue_marker(&self) -> bool {
        self.role == FrameRole::CleanQueue
    }
}

/// An encoded unit.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use mixkit_core::types::{CodecKind, FrameRole, MediaKind, MediaMeta, MediaPacket};
///
/// let meta = MediaMeta::new(MediaKind::Video, FrameRole::Key, CodecKind::H264, 40)
///     .with_stream(7, "cam-a");
/// let packet = MediaPacket::new(meta, Bytes::from_static(b"\x00\x00\x01\x65"))
///     .with_global_header(Bytes::from_static(b"avcC"));
///
/// // Cloning shares the encoded buffer.
/// let copy = packet.clone();
/// assert_eq!(copy.payload.as_ptr(), packet.payload.as_ptr());
/// assert!(packet.codec_header().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub meta: MediaMeta,
    pub payload: Bytes,
    /// Out-of-band decoder configuration (global header / SEI) carried by key frames.
    pub global_header: Option<Bytes>,
}

impl MediaPacket {
    pub const fn new(meta: MediaMeta, payload: Bytes) -> Self {
        Self { meta, payload, global_header: None }
    }

    #[must_use]
    pub fn with_global_header(mut self, header: Bytes) -> Self {
        self.global_header = Some(header);
        self
    }

    /// A clean-queue marker for `kind` at `dts`.
    pub fn clean_queue_marker(kind: MediaKind, dts: u32) -> Self {
        Self::new(MediaMeta::new(kind, FrameRole::CleanQueue, CodecKind::Raw, dts), Bytes::new())
    }

    /// The decoder configuration this packet carries, if any.
    ///
    /// A header-role packet carries it as its payload; any other packet may
    /// carry it as an embedded global header.
    pub fn codec_header(&self) -> Option<CodecHeader> {
        if self.meta.is_header() {
            return Some(CodecHeader::new(self.meta.codec, self.payload.clone()));
        }
        self.global_header.as_ref().map(|h| CodecHeader::new(self.meta.codec, h.clone()))
    }
}

/// A decoded unit.
///
/// Video data is a packed pixel buffer of `width` x `height`. Audio data is
/// interleaved signed 16-bit PCM described by `meta.sample_rate` and `meta.channels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub meta: MediaMeta,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Optional per-pixel alpha mask used by compositing.
    pub alpha: Option<Bytes>,
    /// Layer lives for one composite pass only.
    pub temporary_layer: bool,
    pub transparent_layer: bool,
}

impl MediaFrame {
    pub const fn new(meta: MediaMeta, data: Bytes) -> Self {
        Self {
            meta,
            data,
            width: 0,
            height: 0,
            alpha: None,
            temporary_layer: false,
            transparent_layer: false,
        }
    }

    #[must_use]
    pub const fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Number of PCM samples per channel, for audio frames.
    pub fn audio_samples(&self) -> usize {
        let channels = usize::from(self.meta.channels.max(1));
        self.data.len() / (channels * 2)
    }
}

/// A decoded frame as handed to subscribers.
pub type SharedFrame = Arc<MediaFrame>;

/// An encoded packet as handed to subscribers.
pub type SharedPacket = Arc<MediaPacket>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_round_trip() {
        for kind in [MediaKind::Video, MediaKind::Audio, MediaKind::App, MediaKind::Data] {
            assert_eq!(MediaKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(FrameRole::from_code(10), Some(FrameRole::CleanQueue));
        assert_eq!(CodecKind::from_code(12), Some(CodecKind::H265));
        assert_eq!(MediaKind::from_code(3), None);
    }

    #[test]
    fn unit_ids_are_unique() {
        let a = MediaMeta::new(MediaKind::Video, FrameRole::Key, CodecKind::H264, 0);
        let b = MediaMeta::new(MediaKind::Video, FrameRole::Key, CodecKind::H264, 0);
        assert_ne!(a.uid, b.uid);
    }

    #[test]
    fn header_packet_exposes_payload_as_config() {
        let meta = MediaMeta::new(MediaKind::Audio, FrameRole::Header, CodecKind::Aac, 0);
        let packet = MediaPacket::new(meta, Bytes::from_static(b"\x12\x10"));
        let Some(header) = packet.codec_header() else {
            panic!("header packet should carry a codec header");
        };
        assert_eq!(header.codec, CodecKind::Aac);
        assert_eq!(header.config.as_ref(), b"\x12\x10");
    }

    #[test]
    fn plain_packet_has_no_codec_header() {
        let meta = MediaMeta::new(MediaKind::Video, FrameRole::Predicted, CodecKind::H264, 0);
        let packet = MediaPacket::new(meta, Bytes::from_static(b"p"));
        assert!(packet.codec_header().is_none());
    }

    #[test]
    fn trace_renders_deltas_in_pipeline_order() {
        let mut trace = TimeTrace::default();
        trace.record(3, TimeTraceKey::Decode, 130);
        trace.record(3, TimeTraceKey::Recv, 100);
        assert_eq!(trace.render(), "3:(recv->100,decode->130(+30)), elapse:30");
    }

    #[test]
    fn trace_merge_overwrites_shared_steps() {
        let mut a = TimeTrace::default();
        a.record(1, TimeTraceKey::Recv, 10);
        let mut b = TimeTrace::default();
        b.record(1, TimeTraceKey::Recv, 20);
        b.record(2, TimeTraceKey::Recv, 5);
        a.merge(&b);
        assert_eq!(a.get(1, TimeTraceKey::Recv), Some(20));
        assert_eq!(a.get(2, TimeTraceKey::Recv), Some(5));
    }

    #[test]
    fn audio_sample_count_uses_channels() {
        let meta = MediaMeta::new(MediaKind::Audio, FrameRole::Key, CodecKind::Raw, 0)
            .with_audio_format(48_000, 2);
        let frame = MediaFrame::new(meta, Bytes::from(vec![0u8; 4096]));
        assert_eq!(frame.audio_samples(), 1024);
    }
}
