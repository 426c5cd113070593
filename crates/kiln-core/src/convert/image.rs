//! Image classifier family (224x224 RGB browser-trained models).
//!
//! Longest format chain of the three families: tfjs to keras to savedmodel,
//! then tflite float, or tflite quantized followed by edgetpu.

use async_trait::async_trait;
use tracing::info;

use super::engine::{CalibrationProfile, ConversionEngine, QuantizationSpec};
use super::{ConvertedArtifact, ModelFamily, ModelType, OutputFormat, RequestContext};
use crate::calibration::RepresentativeDataset;
use crate::config::ArtifactNames;
use crate::error::{KilnError, Result};

pub struct ImageFamily;

#[async_trait]
impl ModelFamily for ImageFamily {
    fn model_type(&self) -> ModelType {
        ModelType::Image
    }

    fn label_key(&self) -> &'static str {
        "labels"
    }

    fn supports(&self, format: OutputFormat) -> bool {
        matches!(
            format,
            OutputFormat::Keras
                | OutputFormat::SavedModel
                | OutputFormat::Tflite
                | OutputFormat::TfliteQuantized
                | OutputFormat::EdgeTpu
        )
    }

    fn requires_calibration(&self, format: OutputFormat) -> bool {
        matches!(
            format,
            OutputFormat::TfliteQuantized | OutputFormat::EdgeTpu
        )
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

        let saved_model = ctx.model_dir.join(ArtifactNames::SAVED_MODEL_DIR);
        engine.keras_to_saved_model(&keras, &saved_model).await?;
        if ctx.format == OutputFormat::SavedModel {
            return Ok(ConvertedArtifact::directory(
                saved_model,
                ctx.model_dir.to_path_buf(),
            ));
        }

        if ctx.format == OutputFormat::Tflite {
            let output = ctx.model_dir.join(ArtifactNames::TFLITE_FLOAT);
            engine.saved_model_to_tflite(&saved_model, &output).await?;
            return Ok(ConvertedArtifact::file(output));
        }

        // Quantized and Edge TPU outputs share the calibration step.
        let manifest = ctx.model_dir.join(ArtifactNames::CALIBRATION_MANIFEST);
        let samples = RepresentativeDataset::open(ctx.data_dir, ctx.labels)
            .write_manifest(&manifest)?;
        if samples == 0 {
            return Err(KilnError::MissingDataset {
                format: ctx.format.as_str().to_string(),
            });
        }
        info!(samples, "calibration manifest ready");

        let quantized = ctx.model_dir.join(ArtifactNames::TFLITE_QUANTIZED);
        engine
            .quantize(&QuantizationSpec {
                source: saved_model,
                profile: CalibrationProfile::ImageRgb224,
                manifest,
                output: quantized.clone(),
            })
            .await?;
        if ctx.format == OutputFormat::TfliteQuantized {
            return Ok(ConvertedArtifact::file(quantized));
        }

        engine.compile_edgetpu(&quantized, ctx.model_dir).await?;
        Ok(ConvertedArtifact::file(
            ctx.model_dir.join(ArtifactNames::TFLITE_EDGETPU),
        ))
    }
}
