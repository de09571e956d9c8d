mod engine;
mod engines;
mod manager;
mod post;
mod result;

pub use engine::{EngineFault, InferenceEngine, ModelConfig};
pub use engines::StubEngine;
#[cfg(feature = "backend-tract")]
pub use engines::{TractDirectEngine, TractEngine};
pub use manager::{EngineManager, EngineStatus};
pub use post::{non_max_suppression, scale_bbox};
pub use result::{Detection, ObjectClass};
