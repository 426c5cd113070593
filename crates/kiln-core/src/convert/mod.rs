//! Model conversion: request types, family strategies, engine seam, and the
//! request pipeline.
//!
//! Each supported model family (image, audio, tiny image) implements
//! [`ModelFamily`]; the [`pipeline::ConversionPipeline`] drives the shared
//! request lifecycle and delegates the format-specific transformation chain
//! to the family. All tensor-graph work happens behind the
//! [`engine::ConversionEngine`] seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::metadata::LabelSet;

pub mod audio;
pub mod engine;
pub mod image;
pub mod pipeline;
pub mod scripts;
pub mod templates;
pub mod tiny;

pub use engine::{CalibrationProfile, ConversionEngine, PythonEngine, QuantizationSpec};
pub use pipeline::{ConversionOutput, ConversionPipeline};

/// Model family selected by the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    Image,
    Audio,
    TinyImage,
}

impl ModelType {
    /// Parse the `{type}` path parameter.
    pub fn parse(param: &str) -> Option<Self> {
        match param {
            "image" => Some(ModelType::Image),
            "audio" => Some(ModelType::Audio),
            "tiny_image" => Some(ModelType::TinyImage),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Image => "image",
            ModelType::Audio => "audio",
            ModelType::TinyImage => "tiny_image",
        }
    }
}

/// Requested output representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Keras,
    SavedModel,
    Tflite,
    TfliteQuantized,
    EdgeTpu,
    TinyMl,
}

impl OutputFormat {
    /// Parse the `{format}` path parameter.
    pub fn parse(param: &str) -> Option<Self> {
        match param {
            "keras" => Some(OutputFormat::Keras),
            "savedmodel" => Some(OutputFormat::SavedModel),
            "tflite" => Some(OutputFormat::Tflite),
            "tflite_quantized" => Some(OutputFormat::TfliteQuantized),
            "edgetpu" => Some(OutputFormat::EdgeTpu),
            "tinyml" => Some(OutputFormat::TinyMl),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Keras => "keras",
            OutputFormat::SavedModel => "savedmodel",
            OutputFormat::Tflite => "tflite",
            OutputFormat::TfliteQuantized => "tflite_quantized",
            OutputFormat::EdgeTpu => "edgetpu",
            OutputFormat::TinyMl => "tinyml",
        }
    }
}

/// Per-request context handed to a family's conversion chain.
///
/// Everything a stage needs travels here; nothing about a request is ever
/// stored in process-wide state.
#[derive(Debug)]
pub struct RequestContext<'a> {
    pub format: OutputFormat,
    pub model_dir: &'a Path,
    pub data_dir: &'a Path,
    pub labels: &'a LabelSet,
}

/// Output of a family's transformation chain, ready for packaging.
#[derive(Debug, Clone)]
pub struct ConvertedArtifact {
    primary: PathBuf,
    archive_root: PathBuf,
    is_directory: bool,
}

impl ConvertedArtifact {
    /// A single-file artifact, added to the archive under its base name.
    pub fn file(primary: PathBuf) -> Self {
        let archive_root = primary
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| primary.clone());
        Self {
            primary,
            archive_root,
            is_directory: false,
        }
    }

    /// A directory artifact; archive entries are named relative to
    /// `archive_root` (pass the workspace dir to keep the directory name as
    /// a prefix, or the directory itself to flatten its contents).
    pub fn directory(primary: PathBuf, archive_root: PathBuf) -> Self {
        Self {
            primary,
            archive_root,
            is_directory: true,
        }
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }
}

/// Strategy for one model family.
///
/// The format chains share a strict prefix order (keras, then savedmodel,
/// then the tflite variants); an implementation returns as soon as the
/// requested stage is produced, so earlier formats never pay for later
/// stages.
#[async_trait]
pub trait ModelFamily: Send + Sync {
    fn model_type(&self) -> ModelType;

    /// JSON key holding the label array in this family's metadata.
    fn label_key(&self) -> &'static str;

    fn supports(&self, format: OutputFormat) -> bool;

    /// Whether the format needs a representative dataset for calibration.
    fn requires_calibration(&self, format: OutputFormat) -> bool;

    async fn convert(
        &self,
        ctx: &RequestContext<'_>,
        engine: &dyn ConversionEngine,
    ) -> Result<ConvertedArtifact>;
}
