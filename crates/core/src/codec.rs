// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Seams to the external codec engine.
//!
//! Bit-level decoding and sample-rate conversion are not done here. Stages drive
//! a [`Decoder`] or [`Resampler`] obtained from a factory and only deal with
//! configuration headers, timestamps and dispatch.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{CodecKind, MediaFrame, MediaKind, MediaPacket};

/// Decoder configuration (sequence header, AudioSpecificConfig, ...).
///
/// Two headers are equal when codec and configuration bytes match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodecHeader {
    pub codec: CodecKind,
    pub config: Bytes,
}

impl CodecHeader {
    pub const fn new(codec: CodecKind, config: Bytes) -> Self {
        Self { codec, config }
    }
}

/// Output of one successful decode call.
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub alpha: Option<Bytes>,
    /// Composition offset; the frame's pts is `dts + cts`.
    pub cts: i32,
    /// Audio only.
    pub sample_rate: u32,
    /// Audio only.
    pub channels: u16,
}

/// A stateful decoder bound to one stream.
pub trait Decoder: Send {
    /// (Re)configures the decoder. An `Err` leaves the stage not ready.
    fn configure(&mut self, header: &CodecHeader) -> Result<()>;

    /// Decodes one packet. `Ok(None)` means the decoder buffered the input and
    /// has nothing to emit yet.
    fn decode(&mut self, packet: &MediaPacket) -> Result<Option<DecodedFrame>>;
}

/// Creates decoders for new stages.
pub trait DecoderFactory: Send + Sync {
    fn create_decoder(&self, kind: MediaKind, codec: CodecKind) -> Result<Box<dyn Decoder>>;
}

/// PCM layout on either side of a resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in each emitted frame.
    pub frame_samples: u32,
}

impl AudioFormat {
    /// Byte length of one emitted frame of interleaved s16 PCM.
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples as usize * usize::from(self.channels) * 2
    }

    /// Milliseconds covered by `samples` samples per channel.
    pub fn samples_to_millis(&self, samples: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        samples * 1000 / u64::from(self.sample_rate)
    }
}

/// Converts decoded PCM to a fixed output format and frame size.
pub trait Resampler: Send {
    /// Feeds one decoded frame.
    fn push(&mut self, frame: &MediaFrame) -> Result<()>;

    /// Takes the next complete output frame of exactly `output.frame_bytes()` bytes.
    fn pull(&mut self) -> Option<Bytes>;
}

/// Creates resamplers once the input format is known.
pub trait ResamplerFactory: Send + Sync {
    fn create_resampler(&self, input: AudioFormat, output: AudioFormat) -> Result<Box<dyn Resampler>>;
}
