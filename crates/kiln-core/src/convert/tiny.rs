//! Tiny-image classifier family (96x96 grayscale, microcontroller targets).
//!
//! `tflite` here is dynamic-range quantized by default; the models are
//! destined for constrained devices, so there is no float output. `tinyml`
//! goes further: full int8 quantization against a representative dataset,
//! then an Arduino source bundle with the model baked in as a C array.

use async_trait::async_trait;
use tracing::info;

use super::engine::{CalibrationProfile, ConversionEngine, QuantizationSpec};
use super::templates;
use super::{ConvertedArtifact, ModelFamily, ModelType, OutputFormat, RequestContext};
use crate::calibration::RepresentativeDataset;
use crate::config::ArtifactNames;
use crate::error::{KilnError, Result};

pub struct TinyImageFamily;

#[async_trait]
impl ModelFamily for TinyImageFamily {
    fn model_type(&self) -> ModelType {
        ModelType::TinyImage
    }

    fn label_key(&self) -> &'static str {
        "labels"
    }

    fn supports(&self, format: OutputFormat) -> bool {
        matches!(
            format,
            OutputFormat::Keras | OutputFormat::Tflite | OutputFormat::TinyMl
        )
    }

    fn requires_calibration(&self, format: OutputFormat) -> bool {
        format == OutputFormat::TinyMl
    }

    async fn convert(
        &self,
        ctx: &RequestContext<'_>,
        engine: &dyn ConversionEngine,
    ) -> Result<ConvertedArtifact> {
        let model_json = ctx.model_dir.join(ArtifactNames::MODEL_JSON);
        let keras = ctx.model_dir.join(ArtifactNames::KERAS_MODEL);
        engine.layers_to_keras(&model_json, &keras).await?;
        if ctx.format == OutputFormat::Keras {
            return Ok(ConvertedArtifact::file(keras));
        }

        let tflite = ctx.model_dir.join(ArtifactNames::TFLITE_TINY);

        if ctx.format == OutputFormat::Tflite {
            engine.keras_to_tflite_dynamic(&keras, &tflite).await?;
            return Ok(ConvertedArtifact::file(tflite));
        }

        // tinyml: int8 quantization, then the source bundle.
        let manifest = ctx.model_dir.join(ArtifactNames::CALIBRATION_MANIFEST);
        let samples = RepresentativeDataset::open(ctx.data_dir, ctx.labels)
            .write_manifest(&manifest)?;
        if samples == 0 {
            return Err(KilnError::MissingDataset {
                format: ctx.format.as_str().to_string(),
            });
        }
        info!(samples, "calibration manifest ready");

        engine
            .quantize(&QuantizationSpec {
                source: keras,
                profile: CalibrationProfile::TinyGrayscale96,
                manifest,
                output: tflite.clone(),
            })
            .await?;

        let model_bytes = std::fs::read(&tflite)
            .map_err(|e| KilnError::io("reading quantized model", &tflite, e))?;
        let sketch_dir = ctx.model_dir.join(ArtifactNames::SKETCH_DIR);
        templates::render_sketch(&sketch_dir, &model_bytes, ctx.labels)?;

        // Sketch files sit at the archive root, not under a directory prefix.
        Ok(ConvertedArtifact::directory(
            sketch_dir.clone(),
            sketch_dir,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_formats() {
        let family = TinyImageFamily;
        assert!(family.supports(OutputFormat::Keras));
        assert!(family.supports(OutputFormat::Tflite));
        assert!(family.supports(OutputFormat::TinyMl));
        assert!(!family.supports(OutputFormat::SavedModel));
        assert!(!family.supports(OutputFormat::TfliteQuantized));
        assert!(!family.supports(OutputFormat::EdgeTpu));
    }

    #[test]
    fn test_only_tinyml_needs_calibration() {
        let family = TinyImageFamily;
        assert!(family.requires_calibration(OutputFormat::TinyMl));
        assert!(!family.requires_calibration(OutputFormat::Keras));
        assert!(!family.requires_calibration(OutputFormat::Tflite));
    }
}
