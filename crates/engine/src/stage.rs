// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Decode and resample stages.
//!
//! A [`StageContext`] owns one worker thread, the queue that thread drains and
//! the map of subscribers it dispatches to. The worker pops one unit at a time,
//! hands it to the stage's processor and pushes whatever frames come out into
//! every subscribed [`FanoutTarget`].
//!
//! The subscriber map is behind a reader-writer lock. Dispatch holds the read
//! side for one frame; `add_subscriber`/`del_subscriber` take the write side.
//! Once `del_subscriber` returns, the removed target receives nothing more.

use opentelemetry::{global, KeyValue};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mixkit_core::clock::Clock;
use mixkit_core::codec::{AudioFormat, CodecHeader, Decoder, DecoderFactory, Resampler, ResamplerFactory};
use mixkit_core::error::{MixKitError, Result};
use mixkit_core::fanout::FanoutTarget;
use mixkit_core::queue::{PopTimeout, QueueItem, TimestampQueue};
use mixkit_core::state::StageState;
use mixkit_core::stats::{StageCounters, StageStats};
use mixkit_core::types::{
    next_unit_id, CodecKind, MediaFrame, MediaKind, MediaPacket, SharedFrame, TimeTraceKey,
};

use crate::config::EngineConfig;
use crate::worker::{StopFlag, WorkerHandle};

/// Subscriber name -> target. Targets are owned by whoever subscribed them.
pub type SubscriberMap = HashMap<String, Arc<FanoutTarget>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    Decode,
    Resample,
}

impl StageRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Resample => "resample",
        }
    }
}

#[derive(Debug)]
enum Ingress {
    Packets(Arc<TimestampQueue<MediaPacket>>),
    /// A resample stage is fed through its own fanout target.
    Frames(Arc<FanoutTarget>),
}

/// What a stage does with each unit it pops.
trait StageProcessor: Send + 'static {
    type Input: QueueItem + Send + 'static;

    fn process(&mut self, input: Self::Input, out: &mut Vec<SharedFrame>);
}

#[derive(Clone)]
struct StageMetrics {
    frames_dispatched: opentelemetry::metrics::Counter<u64>,
    stage_errors: opentelemetry::metrics::Counter<u64>,
    labels: [KeyValue; 2],
}

impl StageMetrics {
    fn new(stream_name: &str, role: StageRole) -> Self {
        let meter = global::meter("mixkit_engine");
        Self {
            frames_dispatched: meter
                .u64_counter("stage.frames_dispatched")
                .with_description("Frames pushed into subscriber queues")
                .build(),
            stage_errors: meter
                .u64_counter("stage.errors")
                .with_description("Decode, configure or resample failures")
                .build(),
            labels: [
                KeyValue::new("stream", stream_name.to_string()),
                KeyValue::new("stage", role.as_str()),
            ],
        }
    }
}

/// Pushes produced frames into every current subscriber.
struct Dispatcher {
    label: String,
    subscribers: Arc<RwLock<SubscriberMap>>,
    counters: Arc<StageCounters>,
    metrics: StageMetrics,
}

impl Dispatcher {
    fn dispatch(&self, frame: &SharedFrame) {
        let subscribers = self.subscribers.read();
        let mut delivered = 0u64;
        for (name, target) in subscribers.iter() {
            if target.push_frame(Arc::clone(frame)) {
                delivered += 1;
            } else {
                tracing::trace!(
                    stage = %self.label,
                    subscriber = %name,
                    dts = frame.meta.dts,
                    "Subscriber did not take frame"
                );
            }
        }
        drop(subscribers);

        if delivered > 0 {
            self.counters.sent(delivered);
            self.metrics.frames_dispatched.add(delivered, &self.metrics.labels);
        }
    }
}

fn run_stage_loop<P: StageProcessor>(
    input: &TimestampQueue<P::Input>,
    mut processor: P,
    dispatcher: &Dispatcher,
    pop_timeout: Duration,
    stop: &StopFlag,
) {
    let mut produced = Vec::new();
    while !stop.is_stopped() {
        let Some(unit) = input.pop(PopTimeout::For(pop_timeout)) else {
            continue;
        };
        dispatcher.counters.received();

        let step = panic::catch_unwind(AssertUnwindSafe(|| processor.process(unit, &mut produced)));
        if step.is_err() {
            dispatcher.counters.errored();
            dispatcher.metrics.stage_errors.add(1, &dispatcher.metrics.labels);
            tracing::error!(stage = %dispatcher.label, "Codec call panicked, dropping unit");
            produced.clear();
            continue;
        }

        for frame in produced.drain(..) {
            dispatcher.dispatch(&frame);
        }
    }
    input.log_stats();
    tracing::debug!(stage = %dispatcher.label, "Stage loop exited");
}

/// Frame forwarded downstream when a clean-queue marker reaches a stage.
fn marker_frame(meta: &mixkit_core::types::MediaMeta) -> SharedFrame {
    let mut meta = meta.clone();
    meta.uid = next_unit_id();
    Arc::new(MediaFrame::new(meta, Bytes::new()))
}

struct DecodeProcessor {
    label: String,
    decoder: Box<dyn Decoder>,
    header: Option<CodecHeader>,
    state: StageState,
    consecutive_failures: u32,
    max_failures: u32,
    counters: Arc<StageCounters>,
    metrics: StageMetrics,
    clock: Arc<dyn Clock>,
}

impl DecodeProcessor {
    fn set_state(&mut self, state: StageState) {
        self.state = state;
        self.counters.set_ready(state.is_ready());
    }

    fn apply_header(&mut self, header: CodecHeader, stream_id: u64) {
        if self.state.is_ready() && self.header.as_ref() == Some(&header) {
            return;
        }
        if self.header.is_some() {
            tracing::info!(stage = %self.label, codec = ?header.codec, "Codec configuration changed");
        }
        self.set_state(StageState::NotReady);
        self.header = None;

        match self.decoder.configure(&header) {
            Ok(()) => {
                tracing::info!(
                    stage = %self.label,
                    codec = ?header.codec,
                    stream_id,
                    config_len = header.config.len(),
                    "Decoder configured"
                );
                self.header = Some(header);
                self.consecutive_failures = 0;
                self.counters.configured();
                self.set_state(StageState::Ready);
            },
            Err(e) => {
                self.counters.errored();
                self.metrics.stage_errors.add(1, &self.metrics.labels);
                tracing::warn!(stage = %self.label, error = %e, "Decoder rejected configuration");
            },
        }
    }

    fn on_decode_failure(&mut self, packet: &MediaPacket, error: &MixKitError) {
        self.counters.errored();
        self.metrics.stage_errors.add(1, &self.metrics.labels);
        self.consecutive_failures += 1;
        tracing::debug!(
            stage = %self.label,
            dts = packet.meta.dts,
            frame_id = packet.meta.frame_id,
            error = %error,
            "Decode failed, dropping packet"
        );
        if self.consecutive_failures >= self.max_failures {
            tracing::warn!(
                stage = %self.label,
                failures = self.consecutive_failures,
                "Decoder keeps failing, waiting for a new header"
            );
            self.header = None;
            self.consecutive_failures = 0;
            self.set_state(StageState::NotReady);
        }
    }

    fn build_frame(&self, packet: &MediaPacket, decoded: mixkit_core::codec::DecodedFrame) -> MediaFrame {
        let mut meta = packet.meta.clone();
        meta.uid = next_unit_id();
        meta.codec = CodecKind::Raw;
        meta.pts = packet.meta.dts.checked_add_signed(decoded.cts).unwrap_or(packet.meta.dts);
        if packet.meta.kind == MediaKind::Audio {
            meta.sample_rate = decoded.sample_rate;
            meta.channels = decoded.channels;
        }
        meta.trace.record(packet.meta.stream_id, TimeTraceKey::Decode, self.clock.now_millis());

        MediaFrame {
            meta,
            data: decoded.data,
            width: decoded.width,
            height: decoded.height,
            alpha: decoded.alpha,
            temporary_layer: false,
            transparent_layer: false,
        }
    }
}

impl StageProcessor for DecodeProcessor {
    type Input = MediaPacket;

    fn process(&mut self, packet: MediaPacket, out: &mut Vec<SharedFrame>) {
        if packet.meta.is_clean_queue_marker() {
            out.push(marker_frame(&packet.meta));
            return;
        }
        if let Some(header) = packet.codec_header() {
            self.apply_header(header, packet.meta.stream_id);
        }
        if packet.meta.is_header() {
            return;
        }
        if !self.state.is_ready() {
            self.counters.discarded();
            tracing::debug!(stage = %self.label, dts = packet.meta.dts, "Decoder not ready, dropping packet");
            return;
        }

        match self.decoder.decode(&packet) {
            Ok(Some(decoded)) => {
                self.consecutive_failures = 0;
                out.push(Arc::new(self.build_frame(&packet, decoded)));
            },
            Ok(None) => self.consecutive_failures = 0,
            Err(e) => self.on_decode_failure(&packet, &e),
        }
    }
}

struct ResampleProcessor {
    label: String,
    factory: Arc<dyn ResamplerFactory>,
    output: AudioFormat,
    active: Option<(AudioFormat, Box<dyn Resampler>)>,
    base_dts: Option<u32>,
    samples_out: u64,
    counters: Arc<StageCounters>,
    metrics: StageMetrics,
}

impl ResampleProcessor {
    fn fail(&self, what: &str, error: &MixKitError) {
        self.counters.errored();
        self.metrics.stage_errors.add(1, &self.metrics.labels);
        tracing::warn!(stage = %self.label, error = %error, "{what}");
    }

    fn ensure_resampler(&mut self, input: AudioFormat) -> bool {
        let same_format = self.active.as_ref().is_some_and(|(current, _)| {
            current.sample_rate == input.sample_rate && current.channels == input.channels
        });
        if same_format {
            return true;
        }
        match self.factory.create_resampler(input, self.output) {
            Ok(resampler) => {
                tracing::info!(
                    stage = %self.label,
                    from_rate = input.sample_rate,
                    from_channels = input.channels,
                    to_rate = self.output.sample_rate,
                    to_channels = self.output.channels,
                    "Resampler created"
                );
                self.active = Some((input, resampler));
                self.base_dts = None;
                self.samples_out = 0;
                self.counters.configured();
                self.counters.set_ready(true);
                true
            },
            Err(e) => {
                self.active = None;
                self.counters.set_ready(false);
                self.fail("Resampler creation failed", &e);
                false
            },
        }
    }
}

impl StageProcessor for ResampleProcessor {
    type Input = SharedFrame;

    fn process(&mut self, frame: SharedFrame, out: &mut Vec<SharedFrame>) {
        if frame.meta.is_clean_queue_marker() {
            self.base_dts = None;
            self.samples_out = 0;
            out.push(marker_frame(&frame.meta));
            return;
        }
        if frame.meta.kind != MediaKind::Audio || frame.meta.sample_rate == 0 {
            self.counters.discarded();
            return;
        }

        let input = AudioFormat {
            sample_rate: frame.meta.sample_rate,
            channels: frame.meta.channels,
            frame_samples: u32::try_from(frame.audio_samples()).unwrap_or(u32::MAX),
        };
        if !self.ensure_resampler(input) {
            return;
        }
        let base = *self.base_dts.get_or_insert(frame.meta.dts);

        let Some((_, resampler)) = self.active.as_mut() else {
            return;
        };
        if let Err(e) = resampler.push(&frame) {
            self.fail("Resample failed, dropping frame", &e);
            return;
        }

        let mut emitted = Vec::new();
        while let Some(chunk) = resampler.pull() {
            emitted.push(chunk);
        }
        for chunk in emitted {
            let offset = u32::try_from(self.output.samples_to_millis(self.samples_out)).unwrap_or(u32::MAX);
            self.samples_out += u64::from(self.output.frame_samples);

            let mut meta = frame.meta.clone();
            meta.uid = next_unit_id();
            meta.dts = base.wrapping_add(offset);
            meta.pts = meta.dts;
            meta.sample_rate = self.output.sample_rate;
            meta.channels = self.output.channels;
            out.push(Arc::new(MediaFrame::new(meta, chunk)));
        }
    }
}

/// One pipeline stage bound to one input stream.
#[derive(Debug)]
pub struct StageContext {
    stream_name: String,
    media: MediaKind,
    role: StageRole,
    ingress: Ingress,
    subscribers: Arc<RwLock<SubscriberMap>>,
    counters: Arc<StageCounters>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl StageContext {
    /// Creates a decode stage for `stream_name` and starts its worker.
    ///
    /// # Errors
    ///
    /// Fails if the factory cannot provide a decoder for `codec` or the
    /// worker thread cannot be spawned.
    pub fn spawn_decoder(
        stream_name: &str,
        media: MediaKind,
        codec: CodecKind,
        factory: &dyn DecoderFactory,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let decoder = factory.create_decoder(media, codec)?;
        let label = format!("{stream_name}/{media:?}/decode").to_lowercase();
        let input = Arc::new(TimestampQueue::with_clock(
            format!("{label}.input"),
            config.stage_input_queue,
            Arc::clone(&clock),
        ));

        let subscribers = Arc::new(RwLock::new(SubscriberMap::new()));
        let counters = Arc::new(StageCounters::default());
        let metrics = StageMetrics::new(stream_name, StageRole::Decode);
        let processor = DecodeProcessor {
            label: label.clone(),
            decoder,
            header: None,
            state: StageState::NotReady,
            consecutive_failures: 0,
            max_failures: config.max_consecutive_decode_failures,
            counters: Arc::clone(&counters),
            metrics: metrics.clone(),
            clock,
        };
        let dispatcher = Dispatcher {
            label: label.clone(),
            subscribers: Arc::clone(&subscribers),
            counters: Arc::clone(&counters),
            metrics,
        };

        let queue = Arc::clone(&input);
        let pop_timeout = config.stage_pop_timeout;
        let worker = WorkerHandle::spawn(format!("dec-{stream_name}"), move |stop| {
            run_stage_loop(&queue, processor, &dispatcher, pop_timeout, &stop);
        })?;
        tracing::info!(stage = %label, codec = ?codec, "Stage started");

        Ok(Self {
            stream_name: stream_name.to_string(),
            media,
            role: StageRole::Decode,
            ingress: Ingress::Packets(input),
            subscribers,
            counters,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Creates an audio resample stage for `stream_name` and starts its worker.
    ///
    /// The stage is fed through [`ingress_target`](Self::ingress_target), which
    /// is meant to be subscribed to the stream's audio decode stage.
    ///
    /// # Errors
    ///
    /// Fails if the worker thread cannot be spawned.
    pub fn spawn_resampler(
        stream_name: &str,
        factory: Arc<dyn ResamplerFactory>,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let label = format!("{stream_name}/audio/resample").to_lowercase();
        let ingress = Arc::new(FanoutTarget::with_clock(label.clone(), config.stage_input_queue, clock));
        let input = ingress.subscribe_audio_frames();

        let subscribers = Arc::new(RwLock::new(SubscriberMap::new()));
        let counters = Arc::new(StageCounters::default());
        let metrics = StageMetrics::new(stream_name, StageRole::Resample);
        let processor = ResampleProcessor {
            label: label.clone(),
            factory,
            output: config.resample_output,
            active: None,
            base_dts: None,
            samples_out: 0,
            counters: Arc::clone(&counters),
            metrics: metrics.clone(),
        };
        let dispatcher = Dispatcher {
            label: label.clone(),
            subscribers: Arc::clone(&subscribers),
            counters: Arc::clone(&counters),
            metrics,
        };

        let pop_timeout = config.stage_pop_timeout;
        let worker = WorkerHandle::spawn(format!("rsmp-{stream_name}"), move |stop| {
            run_stage_loop(&input, processor, &dispatcher, pop_timeout, &stop);
        })?;
        tracing::info!(stage = %label, "Stage started");

        Ok(Self {
            stream_name: stream_name.to_string(),
            media: MediaKind::Audio,
            role: StageRole::Resample,
            ingress: Ingress::Frames(ingress),
            subscribers,
            counters,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub const fn media(&self) -> MediaKind {
        self.media
    }

    pub const fn role(&self) -> StageRole {
        self.role
    }

    /// Queues an encoded packet for decoding, keyed by dts.
    ///
    /// Returns `false` for resample stages or when the input queue rejects the
    /// key as rollback.
    pub fn push_packet(&self, packet: MediaPacket) -> bool {
        match &self.ingress {
            Ingress::Packets(queue) => queue.push(packet.meta.dts, packet),
            Ingress::Frames(_) => false,
        }
    }

    /// The target feeding a resample stage.
    pub fn ingress_target(&self) -> Option<Arc<FanoutTarget>> {
        match &self.ingress {
            Ingress::Frames(target) => Some(Arc::clone(target)),
            Ingress::Packets(_) => None,
        }
    }

    /// Inserts or replaces the subscriber registered under `name`.
    pub fn add_subscriber(&self, name: impl Into<String>, target: Arc<FanoutTarget>) {
        let name = name.into();
        let replaced = self.subscribers.write().insert(name.clone(), target).is_some();
        tracing::debug!(
            stream = %self.stream_name,
            stage = self.role.as_str(),
            subscriber = %name,
            replaced,
            "Subscriber added"
        );
    }

    /// Removes the subscriber registered under `name`. Returns whether it existed.
    pub fn del_subscriber(&self, name: &str) -> bool {
        let removed = self.subscribers.write().remove(name).is_some();
        if removed {
            tracing::debug!(stream = %self.stream_name, subscriber = %name, "Subscriber removed");
        } else {
            tracing::debug!(stream = %self.stream_name, subscriber = %name, "Subscriber not found");
        }
        removed
    }

    pub fn subscriber(&self, name: &str) -> Option<Arc<FanoutTarget>> {
        self.subscribers.read().get(name).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> StageStats {
        self.counters.snapshot()
    }

    /// Whether the stage currently has a usable configuration.
    pub fn is_ready(&self) -> bool {
        self.counters.is_ready()
    }

    pub fn request_stop(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.request_stop();
        }
    }

    /// Stops the worker (if not already asked to) and waits for it.
    ///
    /// An in-flight codec call finishes first. Returns `false` if the worker
    /// had panicked. Calling it again is a no-op.
    pub fn join(&self) -> bool {
        let worker = self.worker.lock().take();
        worker.is_none_or(|worker| {
            worker.request_stop();
            worker.join()
        })
    }
}

impl Drop for StageContext {
    fn drop(&mut self) {
        self.join();
    }
}
