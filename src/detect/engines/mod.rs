//! Concrete inference engines.
//!
//! - `stub`: luminance-blob detector for demos and tests, no model file
//! - `tract`: ONNX inference via tract (feature `backend-tract`), in an
//!   optimized-graph and a direct-graph flavor

pub mod stub;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubEngine;
#[cfg(feature = "backend-tract")]
pub use tract::{TractDirectEngine, TractEngine};
