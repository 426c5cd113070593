//! Sound classifier family.
//!
//! Audio models support a single output format: TFLite with embedded
//! audio-classifier metadata. The engine prepends the pretrained
//! spectrogram preprocessing model so the exported model accepts raw
//! samples, then embeds the label file. Labels live under `wordLabels` in
//! this family's metadata.

use async_trait::async_trait;

use super::engine::ConversionEngine;
use super::{ConvertedArtifact, ModelFamily, ModelType, OutputFormat, RequestContext};
use crate::config::ArtifactNames;
use crate::error::Result;

pub struct AudioFamily;

#[async_trait]
impl ModelFamily for AudioFamily {
    fn model_type(&self) -> ModelType {
        ModelType::Audio
    }

    fn label_key(&self) -> &'static str {
        "wordLabels"
    }

    fn supports(&self, format: OutputFormat) -> bool {
        format == OutputFormat::Tflite
    }

    fn requires_calibration(&self, _format: OutputFormat) -> bool {
        false
    }

    async fn convert(
        &self,
        ctx: &RequestContext<'_>,
        engine: &dyn ConversionEngine,
    ) -> Result<ConvertedArtifact> {
        let model_json = ctx.model_dir.join(ArtifactNames::MODEL_JSON);
        let label_index = ctx.model_dir.join(ArtifactNames::LABELS_FILE);
        let output = ctx.model_dir.join(ArtifactNames::AUDIO_TFLITE_WITH_METADATA);
        engine
            .convert_audio(&model_json, &label_index, &output)
            .await?;
        Ok(ConvertedArtifact::file(output))
    }
}
