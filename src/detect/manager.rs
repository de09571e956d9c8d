//! Engine lifecycle and fault policy.
//!
//! The manager owns a primary and a fallback engine. Loading prefers the
//! configured device and quietly retries on CPU. At inference time the
//! policy is: transient faults are logged and the frame yields no
//! detections; two fatal faults in a row permanently retire the primary and
//! the fallback serves every frame from then on. `infer` itself never
//! fails; a monitoring daemon has no better answer to an engine fault than
//! "no detections this frame".

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::EngineSettings;
use crate::detect::engine::{EngineFault, InferenceEngine, ModelConfig};
use crate::detect::engines::StubEngine;
#[cfg(feature = "backend-tract")]
use crate::detect::engines::{TractDirectEngine, TractEngine};
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Fatal faults in a row before the primary engine is retired.
const MAX_CONSECUTIVE_FATAL: u32 = 2;

#[derive(Clone, Debug, Serialize)]
pub struct EngineStatus {
    pub active: String,
    pub on_fallback: bool,
    pub fatal_faults: u64,
    pub transient_faults: u64,
}

pub struct EngineManager {
    primary: Box<dyn InferenceEngine>,
    fallback: Box<dyn InferenceEngine>,
    config: ModelConfig,
    confidence_threshold: f32,
    nms_threshold: f32,
    on_fallback: bool,
    consecutive_fatal: u32,
    fatal_faults: u64,
    transient_faults: u64,
}

impl EngineManager {
    pub fn new(
        primary: Box<dyn InferenceEngine>,
        fallback: Box<dyn InferenceEngine>,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            primary,
            fallback,
            config: ModelConfig::from_settings(settings),
            confidence_threshold: settings.confidence_threshold,
            nms_threshold: settings.nms_threshold,
            on_fallback: false,
            consecutive_fatal: 0,
            fatal_faults: 0,
            transient_faults: 0,
        }
    }

    /// Build the engine pair named by the configuration.
    ///
    /// "tract" pairs the optimized plan with the direct plan as fallback;
    /// "tract-direct" and "stub" fall back to a fresh instance of
    /// themselves.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let (primary, fallback): (Box<dyn InferenceEngine>, Box<dyn InferenceEngine>) =
            match settings.engine.as_str() {
                "stub" => (Box::new(StubEngine::new()), Box::new(StubEngine::new())),
                #[cfg(feature = "backend-tract")]
                "tract" => (
                    Box::new(TractEngine::new()),
                    Box::new(TractDirectEngine::new()),
                ),
                #[cfg(feature = "backend-tract")]
                "tract-direct" => (
                    Box::new(TractDirectEngine::new()),
                    Box::new(TractDirectEngine::new()),
                ),
                other => anyhow::bail!("unknown inference engine {:?}", other),
            };
        Ok(Self::new(primary, fallback, settings))
    }

    /// Load both engines. A primary that fails its preferred device gets
    /// one CPU retry; the fallback always loads on CPU.
    pub fn load(&mut self) -> Result<()> {
        let mut config = self.config.clone();
        match self.primary.load(&config) {
            Ok(()) => {}
            Err(e) if config.prefer_gpu => {
                log::info!(
                    "engine '{}' failed to load with gpu preference, retrying on cpu: {:#}",
                    self.primary.name(),
                    e
                );
                config.prefer_gpu = false;
                self.primary
                    .load(&config)
                    .with_context(|| format!("load engine {}", self.primary.name()))?;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("load engine {}", self.primary.name()))
            }
        }

        let mut fallback_config = self.config.clone();
        fallback_config.prefer_gpu = false;
        self.fallback
            .load(&fallback_config)
            .with_context(|| format!("load fallback engine {}", self.fallback.name()))?;
        Ok(())
    }

    /// Run detection on one frame. Faults degrade to an empty result.
    pub fn infer(&mut self, frame: &Frame) -> Vec<Detection> {
        if self.on_fallback {
            return match self
                .fallback
                .infer(frame, self.confidence_threshold, self.nms_threshold)
            {
                Ok(detections) => detections,
                Err(e) => {
                    log::error!("fallback engine '{}' failed: {:#}", self.fallback.name(), e);
                    Vec::new()
                }
            };
        }

        match self
            .primary
            .infer(frame, self.confidence_threshold, self.nms_threshold)
        {
            Ok(detections) => {
                self.consecutive_fatal = 0;
                detections
            }
            Err(e) => {
                self.note_primary_failure(e);
                Vec::new()
            }
        }
    }

    fn note_primary_failure(&mut self, e: anyhow::Error) {
        let fatal = e
            .downcast_ref::<EngineFault>()
            .map(|fault| fault.fatal)
            .unwrap_or(false);

        if !fatal {
            self.transient_faults += 1;
            log::warn!("engine '{}' transient fault: {:#}", self.primary.name(), e);
            return;
        }

        self.fatal_faults += 1;
        self.consecutive_fatal += 1;
        log::warn!(
            "engine '{}' fatal fault {}/{}: {:#}",
            self.primary.name(),
            self.consecutive_fatal,
            MAX_CONSECUTIVE_FATAL,
            e
        );
        if self.consecutive_fatal >= MAX_CONSECUTIVE_FATAL {
            log::warn!(
                "engine '{}' retired after {} consecutive fatal faults, '{}' takes over",
                self.primary.name(),
                self.consecutive_fatal,
                self.fallback.name()
            );
            self.on_fallback = true;
        }
    }

    pub fn active_name(&self) -> &'static str {
        if self.on_fallback {
            self.fallback.name()
        } else {
            self.primary.name()
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            active: self.active_name().to_string(),
            on_fallback: self.on_fallback,
            fatal_faults: self.fatal_faults,
            transient_faults: self.transient_faults,
        }
    }
}
