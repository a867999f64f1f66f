//! Inference engine module
//!
//! Provides the expression tracking core:
//! - Affine resampling of zone-tagged frames into model input tensors
//! - An opaque async executor seam, backed by ONNX Runtime
//! - The runtime façade with double-buffered outputs and consumer locking

pub mod executor;
pub mod preprocess;
pub mod runtime;

pub use executor::{Executor, InferSession, OrtExecutor};
pub use preprocess::{ImageFrame, ImagePlane};
pub use runtime::{DataView, Runtime};
