// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-task registry of stages, keyed by input stream.
//!
//! Stages are created the first time a unit for a stream arrives. Video gets a
//! single decode stage. Audio gets a decode stage whose only subscriber is a
//! resample stage, and consumers attach to the resample stage.
//!
//! Subscriptions are recorded before they are applied, so a consumer may
//! subscribe to a stream that has not produced anything yet: the stage picks
//! the subscription up when it is created.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mixkit_core::error::Result;
use mixkit_core::fanout::FanoutTarget;
use mixkit_core::types::{CodecKind, MediaKind, MediaPacket};

use crate::config::EngineConfig;
use crate::services::EngineServices;
use crate::stage::StageContext;

/// Subscriber name a decode stage uses for the resample stage behind it.
pub const RESAMPLE_SUBSCRIBER: &str = "__resample";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StageKey {
    stream_name: String,
    media: MediaKind,
}

/// The stages serving one (stream, media kind) pair.
#[derive(Debug)]
pub struct StageChain {
    entry: StageContext,
    exit: Option<StageContext>,
    next_frame_id: AtomicU64,
}

impl StageChain {
    /// The stage receiving encoded packets.
    pub const fn entry(&self) -> &StageContext {
        &self.entry
    }

    /// The stage consumers subscribe to.
    pub fn output(&self) -> &StageContext {
        self.exit.as_ref().unwrap_or(&self.entry)
    }

    fn request_stop(&self) {
        self.entry.request_stop();
        if let Some(exit) = &self.exit {
            exit.request_stop();
        }
    }

    fn join(&self) {
        self.entry.join();
        if let Some(exit) = &self.exit {
            exit.join();
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    chains: HashMap<StageKey, Arc<StageChain>>,
    closed: bool,
}

type PendingMap = HashMap<String, HashMap<String, Arc<FanoutTarget>>>;

#[derive(Debug)]
pub struct StreamPipeline {
    owner: String,
    config: Arc<EngineConfig>,
    services: Arc<EngineServices>,
    registry: Mutex<Registry>,
    pending: Mutex<PendingMap>,
}

impl StreamPipeline {
    pub fn new(owner: impl Into<String>, config: Arc<EngineConfig>, services: Arc<EngineServices>) -> Self {
        Self {
            owner: owner.into(),
            config,
            services,
            registry: Mutex::new(Registry::default()),
            pending: Mutex::new(PendingMap::new()),
        }
    }

    fn create_chain(&self, key: &StageKey, codec: CodecKind) -> Result<StageChain> {
        let clock = Arc::clone(&self.services.clock);
        let entry = StageContext::spawn_decoder(
            &key.stream_name,
            key.media,
            codec,
            self.services.decoders.as_ref(),
            &self.config,
            Arc::clone(&clock),
        )?;

        let exit = if key.media == MediaKind::Audio {
            let resample = StageContext::spawn_resampler(
                &key.stream_name,
                Arc::clone(&self.services.resamplers),
                &self.config,
                clock,
            )?;
            if let Some(ingress) = resample.ingress_target() {
                entry.add_subscriber(RESAMPLE_SUBSCRIBER, ingress);
            }
            Some(resample)
        } else {
            None
        };

        Ok(StageChain { entry, exit, next_frame_id: AtomicU64::new(1) })
    }

    fn attach_pending(&self, stream_name: &str, chain: &StageChain) {
        let pending = self.pending.lock();
        if let Some(subscribers) = pending.get(stream_name) {
            for (name, target) in subscribers {
                chain.output().add_subscriber(name.clone(), Arc::clone(target));
            }
        }
    }

    /// Routes an encoded unit to the stage for its stream, creating the stage
    /// on first sight.
    ///
    /// The packet's `frame_id` is assigned here. Returns `false` when the unit
    /// was not queued (not decodable media, stage creation failure, rollback
    /// rejection or pipeline already torn down).
    pub fn route_unit(&self, mut packet: MediaPacket) -> bool {
        let media = packet.meta.kind;
        if !media.is_decodable() {
            tracing::debug!(task_id = %self.owner, kind = ?media, "Ignoring non-media unit");
            return false;
        }
        let key = StageKey { stream_name: packet.meta.stream_name.clone(), media };

        let chain = {
            let mut registry = self.registry.lock();
            if registry.closed {
                return false;
            }
            if let Some(chain) = registry.chains.get(&key) {
                Arc::clone(chain)
            } else {
                if packet.meta.is_clean_queue_marker() {
                    return false;
                }
                let chain = match self.create_chain(&key, packet.meta.codec) {
                    Ok(chain) => Arc::new(chain),
                    Err(e) => {
                        tracing::error!(
                            task_id = %self.owner,
                            stream = %key.stream_name,
                            kind = ?media,
                            error = %e,
                            "Failed to create stage"
                        );
                        return false;
                    },
                };
                self.attach_pending(&key.stream_name, &chain);
                tracing::info!(
                    task_id = %self.owner,
                    stream = %key.stream_name,
                    kind = ?media,
                    subscribers = chain.output().subscriber_count(),
                    "Created stage for new stream"
                );
                registry.chains.insert(key, Arc::clone(&chain));
                chain
            }
        };

        packet.meta.frame_id = chain.next_frame_id.fetch_add(1, Ordering::Relaxed);
        chain.entry.push_packet(packet)
    }

    /// Subscribes `target` to `stream_name` under `subscriber`, now if the
    /// stream has stages and otherwise as soon as they are created.
    pub fn subscribe(&self, stream_name: &str, subscriber: &str, target: Arc<FanoutTarget>) {
        self.pending
            .lock()
            .entry(stream_name.to_string())
            .or_default()
            .insert(subscriber.to_string(), Arc::clone(&target));

        let registry = self.registry.lock();
        for (key, chain) in &registry.chains {
            if key.stream_name == stream_name {
                chain.output().add_subscriber(subscriber, Arc::clone(&target));
            }
        }
        tracing::debug!(
            task_id = %self.owner,
            stream = %stream_name,
            subscriber = %subscriber,
            "Subscription recorded"
        );
    }

    /// Removes a subscription, pending or applied. Returns whether one existed.
    pub fn unsubscribe(&self, stream_name: &str, subscriber: &str) -> bool {
        let mut removed = {
            let mut pending = self.pending.lock();
            let removed = pending.get_mut(stream_name).is_some_and(|subs| subs.remove(subscriber).is_some());
            if pending.get(stream_name).is_some_and(HashMap::is_empty) {
                pending.remove(stream_name);
            }
            removed
        };

        let registry = self.registry.lock();
        for (key, chain) in &registry.chains {
            if key.stream_name == stream_name {
                removed |= chain.output().del_subscriber(subscriber);
            }
        }
        removed
    }

    /// The stages for `stream_name` and `media`, if created.
    pub fn stage(&self, stream_name: &str, media: MediaKind) -> Option<Arc<StageChain>> {
        let key = StageKey { stream_name: stream_name.to_string(), media };
        self.registry.lock().chains.get(&key).cloned()
    }

    pub fn stage_count(&self) -> usize {
        self.registry.lock().chains.len()
    }

    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.registry.lock().chains.keys().map(|k| k.stream_name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn is_torn_down(&self) -> bool {
        self.registry.lock().closed
    }

    /// Stops and joins every stage. Returns how many stage chains were joined.
    ///
    /// Stages are signalled under the registry lock and joined after it is
    /// released. Later calls, and later `route_unit` calls, do nothing.
    pub fn teardown_all(&self) -> usize {
        let drained: Vec<Arc<StageChain>> = {
            let mut registry = self.registry.lock();
            if registry.closed {
                return 0;
            }
            registry.closed = true;
            let drained: Vec<_> = registry.chains.drain().map(|(_, chain)| chain).collect();
            for chain in &drained {
                chain.request_stop();
            }
            drained
        };

        let count = drained.len();
        for chain in drained {
            chain.join();
        }
        self.pending.lock().clear();
        tracing::info!(task_id = %self.owner, stages = count, "Pipeline torn down");
        count
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        self.teardown_all();
    }
}
