//! Kiln core - headless library for converting browser-trained classifier
//! bundles into deployable artifacts.
//!
//! A bundle (tfjs layers model + metadata descriptor, zipped) goes in; a
//! Keras model, SavedModel, TFLite interpreter model (float or quantized),
//! Edge TPU binary, or microcontroller source sketch comes out, packaged
//! together with a plain-text label index. The HTTP surface lives in the
//! `kiln-server` crate; this crate can drive conversions programmatically.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kiln_core::{ConversionPipeline, PythonEngine};
//!
//! #[tokio::main]
//! async fn main() -> kiln_core::Result<()> {
//!     let engine = PythonEngine::new("./kiln-data", "./sc_preproc_model");
//!     engine.ensure_environment().await?;
//!
//!     let pipeline = ConversionPipeline::new(Arc::new(engine));
//!     let bundle = std::fs::read("model.zip")?;
//!     let output = pipeline.convert("image", "keras", &bundle, None).await?;
//!     std::fs::write(output.download_name, output.archive)?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod calibration;
pub mod config;
pub mod convert;
pub mod error;
pub mod metadata;
pub mod workspace;

// Re-export commonly used types
pub use calibration::RepresentativeDataset;
pub use convert::{
    CalibrationProfile, ConversionEngine, ConversionOutput, ConversionPipeline, ModelFamily,
    ModelType, OutputFormat, PythonEngine, QuantizationSpec,
};
pub use error::{KilnError, Result};
pub use metadata::LabelSet;
pub use workspace::Workspace;
