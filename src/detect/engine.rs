//! The inference engine contract and its fault type.

use anyhow::Result;
use std::fmt;

use crate::config::EngineSettings;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// What an engine needs to load its model.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub model_path: Option<String>,
    pub input_width: u32,
    pub input_height: u32,
    pub prefer_gpu: bool,
}

impl ModelConfig {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            model_path: settings.model_path.clone(),
            input_width: settings.input_width,
            input_height: settings.input_height,
            prefer_gpu: settings.prefer_gpu,
        }
    }
}

/// An engine failure with a stable code and a fatality flag.
///
/// Fatal faults stand in for native-layer crashes: the engine instance is
/// suspect afterwards. Transient faults are per-frame problems (bad input,
/// timeout) that say nothing about engine health. The manager keys its
/// fallback decision on this flag.
#[derive(Clone, Debug)]
pub struct EngineFault {
    pub code: &'static str,
    pub message: String,
    pub fatal: bool,
}

impl EngineFault {
    pub fn fatal(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fatal: true,
        }
    }

    pub fn transient(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fatal: false,
        }
    }
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineFault {}

/// A detection engine: load once, infer per frame.
///
/// `infer` returns detections in SOURCE pixel coordinates with confidence
/// filtering and class-aware non-max suppression already applied. Errors
/// should carry an `EngineFault` so callers can tell a sick engine from a
/// bad frame.
pub trait InferenceEngine: Send {
    fn name(&self) -> &'static str;

    fn load(&mut self, config: &ModelConfig) -> Result<()>;

    fn infer(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<Detection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_formats_with_code() {
        let fault = EngineFault::fatal("inference_failure", "tensor shape mismatch");
        assert_eq!(
            fault.to_string(),
            "inference_failure: tensor shape mismatch"
        );
        assert!(fault.fatal);
        assert!(!EngineFault::transient("bad_input", "short frame").fatal);
    }

    #[test]
    fn fault_survives_anyhow_round_trip() {
        let err: anyhow::Error = EngineFault::fatal("inference_failure", "boom").into();
        let fault = err.downcast_ref::<EngineFault>().unwrap();
        assert!(fault.fatal);
        assert_eq!(fault.code, "inference_failure");
    }
}
