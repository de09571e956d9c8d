#![cfg(feature = "backend-tract")]

//! ONNX inference via tract.
//!
//! Two flavors of the same model plan:
//!
//! - `TractEngine` runs the fully optimized graph (fastest)
//! - `TractDirectEngine` runs the decluttered-but-unoptimized graph, which
//!   tolerates more exotic ops and makes a sturdier fallback
//!
//! tract has no GPU execution provider; a GPU preference is acknowledged
//! with a log line and served on CPU.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::engine::{EngineFault, InferenceEngine, ModelConfig};
use crate::detect::post;
use crate::detect::result::Detection;
use crate::frame::Frame;

struct LoadedPlan {
    plan: TypedSimplePlan<TypedModel>,
    input_width: u32,
    input_height: u32,
}

fn build_plan(config: &ModelConfig, optimize: bool) -> Result<LoadedPlan> {
    let path = config
        .model_path
        .as_deref()
        .ok_or_else(|| anyhow!("tract engines require a model_path"))?;

    let model = tract_onnx::onnx()
        .model_for_path(Path::new(path))
        .with_context(|| format!("failed to load ONNX model from {}", path))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(
                    1,
                    3,
                    config.input_height as usize,
                    config.input_width as usize
                ),
            ),
        )
        .context("failed to set input fact")?;

    let typed = if optimize {
        model.into_optimized().context("failed to optimize ONNX model")?
    } else {
        model
            .into_typed()
            .context("failed to type ONNX model")?
            .into_decluttered()
            .context("failed to declutter ONNX model")?
    };

    let plan = typed
        .into_runnable()
        .context("failed to build runnable ONNX model")?;

    Ok(LoadedPlan {
        plan,
        input_width: config.input_width,
        input_height: config.input_height,
    })
}

fn frame_to_tensor(frame: &Frame, input_width: u32, input_height: u32) -> Result<Tensor> {
    if frame.channels != 3 {
        return Err(EngineFault::transient(
            "bad_input",
            format!("expected RGB frames, got {} channel(s)", frame.channels),
        )
        .into());
    }
    let expected = (frame.width as usize)
        .checked_mul(frame.height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    let pixels = frame.pixels();
    if pixels.len() != expected {
        return Err(EngineFault::transient(
            "bad_input",
            format!("expected {} RGB bytes, received {}", expected, pixels.len()),
        )
        .into());
    }

    // Nearest-neighbor resize into the model's input space, NCHW, 0..1.
    let fw = frame.width as usize;
    let fh = frame.height as usize;
    let iw = input_width as usize;
    let ih = input_height as usize;
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, ih, iw), |(_, channel, y, x)| {
        let sx = (x * fw) / iw;
        let sy = (y * fh) / ih;
        pixels[(sy * fw + sx) * 3 + channel] as f32 / 255.0
    });

    Ok(input.into_tensor())
}

fn run_plan(
    loaded: &LoadedPlan,
    engine: &'static str,
    frame: &Frame,
    confidence_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let input = frame_to_tensor(frame, loaded.input_width, loaded.input_height)?;
    let outputs = loaded.plan.run(tvec!(input.into())).map_err(|e| {
        EngineFault::fatal("inference_failure", format!("{} run failed: {}", engine, e))
    })?;
    let output = outputs
        .first()
        .ok_or_else(|| EngineFault::fatal("inference_failure", "model produced no outputs"))?;

    let shape = output.shape().to_vec();
    let data = output
        .as_slice::<f32>()
        .map_err(|_| EngineFault::fatal("inference_failure", "model output tensor was not f32"))?;

    // Detection heads come as [1, attrs, anchors] or transposed; anchors
    // always outnumber attributes.
    let (attrs, anchors, attrs_first) = match shape.as_slice() {
        [1, a, b] if a <= b => (*a, *b, true),
        [1, a, b] => (*b, *a, false),
        other => {
            return Err(EngineFault::fatal(
                "inference_failure",
                format!("unexpected output shape {:?}", other),
            )
            .into())
        }
    };

    let detections = post::decode_yolo_output(
        data,
        attrs,
        anchors,
        attrs_first,
        confidence_threshold,
        &frame.camera_id,
        frame.timestamp_ms,
    );
    let detections = post::non_max_suppression(detections, confidence_threshold, nms_threshold);

    Ok(detections
        .into_iter()
        .map(|mut d| {
            d.bbox = post::scale_bbox(
                &d.bbox,
                loaded.input_width,
                loaded.input_height,
                frame.width,
                frame.height,
            );
            d
        })
        .collect())
}

pub struct TractEngine {
    loaded: Option<LoadedPlan>,
}

impl TractEngine {
    pub fn new() -> Self {
        Self { loaded: None }
    }
}

impl Default for TractEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load(&mut self, config: &ModelConfig) -> Result<()> {
        if config.prefer_gpu {
            log::info!("tract: no gpu execution provider, using cpu");
        }
        self.loaded = Some(build_plan(config, true)?);
        Ok(())
    }

    fn infer(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let loaded = self
            .loaded
            .as_ref()
            .ok_or_else(|| EngineFault::transient("not_loaded", "tract engine has no model"))?;
        run_plan(loaded, "tract", frame, confidence_threshold, nms_threshold)
    }
}

pub struct TractDirectEngine {
    loaded: Option<LoadedPlan>,
}

impl TractDirectEngine {
    pub fn new() -> Self {
        Self { loaded: None }
    }
}

impl Default for TractDirectEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for TractDirectEngine {
    fn name(&self) -> &'static str {
        "tract-direct"
    }

    fn load(&mut self, config: &ModelConfig) -> Result<()> {
        if config.prefer_gpu {
            log::info!("tract-direct: no gpu execution provider, using cpu");
        }
        self.loaded = Some(build_plan(config, false)?);
        Ok(())
    }

    fn infer(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let loaded = self.loaded.as_ref().ok_or_else(|| {
            EngineFault::transient("not_loaded", "tract-direct engine has no model")
        })?;
        run_plan(loaded, "tract-direct", frame, confidence_threshold, nms_threshold)
    }
}
