// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! External collaborators handed to the task manager at `init`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mixkit_core::clock::{system_clock, Clock};
use mixkit_core::codec::{DecoderFactory, ResamplerFactory};
use mixkit_core::error::{MixKitError, Result};

use crate::script::{NullSink, OutputSink, ScriptEngineFactory};

/// Codec engine, scripting engine, output sink and resource location.
#[derive(Clone)]
pub struct EngineServices {
    pub decoders: Arc<dyn DecoderFactory>,
    pub resamplers: Arc<dyn ResamplerFactory>,
    pub scripts: Arc<dyn ScriptEngineFactory>,
    pub sink: Arc<dyn OutputSink>,
    /// Fonts, overlays and scripts are resolved relative to this directory.
    pub resource_root: PathBuf,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineServices")
            .field("resource_root", &self.resource_root)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl EngineServices {
    pub fn new(
        decoders: Arc<dyn DecoderFactory>,
        resamplers: Arc<dyn ResamplerFactory>,
        scripts: Arc<dyn ScriptEngineFactory>,
        resource_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            decoders,
            resamplers,
            scripts,
            sink: Arc::new(NullSink),
            resource_root: resource_root.into(),
            clock: system_clock(),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Resolves a script or asset path against the resource root.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.resource_root.join(relative)
        }
    }

    /// # Errors
    ///
    /// `Configuration` when no resource root is set.
    pub fn validate(&self) -> Result<()> {
        if self.resource_root.as_os_str().is_empty() {
            return Err(MixKitError::Configuration("resource root must not be empty".into()));
        }
        Ok(())
    }
}
