// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A codec engine that does no codec work.
//!
//! Payloads are treated as already-raw data so pipelines can run end to end
//! without a real codec library (simulation, tests). Header conventions:
//!
//! - video: `width: u16 BE, height: u16 BE`
//! - audio: `sample_rate: u32 BE, channels: u8`
//!
//! An empty header is rejected and so is an empty payload, which gives
//! callers a way to exercise configuration and decode failures.

use bytes::{Buf, Bytes, BytesMut};

use mixkit_core::codec::{
    AudioFormat, CodecHeader, DecodedFrame, Decoder, DecoderFactory, Resampler, ResamplerFactory,
};
use mixkit_core::error::{MixKitError, Result};
use mixkit_core::types::{CodecKind, MediaFrame, MediaKind, MediaPacket};

/// Builds a video configuration header understood by [`PassthroughDecoder`].
pub fn video_header(width: u16, height: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.extend_from_slice(&width.to_be_bytes());
    buf.extend_from_slice(&height.to_be_bytes());
    buf.freeze()
}

/// Builds an audio configuration header understood by [`PassthroughDecoder`].
pub fn audio_header(sample_rate: u32, channels: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.extend_from_slice(&sample_rate.to_be_bytes());
    buf.extend_from_slice(&[channels]);
    buf.freeze()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoderFactory;

impl DecoderFactory for PassthroughDecoderFactory {
    fn create_decoder(&self, kind: MediaKind, _codec: CodecKind) -> Result<Box<dyn Decoder>> {
        if !kind.is_decodable() {
            return Err(MixKitError::Codec(format!("no decoder for {kind:?}")));
        }
        Ok(Box::new(PassthroughDecoder { kind, width: 0, height: 0, sample_rate: 0, channels: 0 }))
    }
}

#[derive(Debug)]
pub struct PassthroughDecoder {
    kind: MediaKind,
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u16,
}

impl Decoder for PassthroughDecoder {
    fn configure(&mut self, header: &CodecHeader) -> Result<()> {
        let mut config = header.config.clone();
        match self.kind {
            MediaKind::Video if config.len() >= 4 => {
                self.width = u32::from(config.get_u16());
                self.height = u32::from(config.get_u16());
            },
            MediaKind::Audio if config.len() >= 5 => {
                self.sample_rate = config.get_u32();
                self.channels = u16::from(config.get_u8());
            },
            _ => {
                return Err(MixKitError::Codec(format!(
                    "{:?} header of {} bytes is too short",
                    self.kind,
                    config.len()
                )));
            },
        }
        Ok(())
    }

    fn decode(&mut self, packet: &MediaPacket) -> Result<Option<DecodedFrame>> {
        if packet.payload.is_empty() {
            return Err(MixKitError::Codec("empty payload".into()));
        }
        Ok(Some(DecodedFrame {
            data: packet.payload.clone(),
            width: self.width,
            height: self.height,
            alpha: None,
            cts: 0,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughResamplerFactory;

impl ResamplerFactory for PassthroughResamplerFactory {
    fn create_resampler(&self, _input: AudioFormat, output: AudioFormat) -> Result<Box<dyn Resampler>> {
        if output.frame_bytes() == 0 {
            return Err(MixKitError::Codec("empty output frame".into()));
        }
        Ok(Box::new(PassthroughResampler { frame_bytes: output.frame_bytes(), pending: BytesMut::new() }))
    }
}

/// Re-chunks PCM into fixed-size frames. The sample rate is not converted.
#[derive(Debug)]
pub struct PassthroughResampler {
    frame_bytes: usize,
    pending: BytesMut,
}

impl Resampler for PassthroughResampler {
    fn push(&mut self, frame: &MediaFrame) -> Result<()> {
        self.pending.extend_from_slice(&frame.data);
        Ok(())
    }

    fn pull(&mut self) -> Option<Bytes> {
        (self.pending.len() >= self.frame_bytes).then(|| self.pending.split_to(self.frame_bytes).freeze())
    }
}
