//! Request pipeline: the shared conversion lifecycle.
//!
//! One call per HTTP request, strictly sequential: validate, acquire a
//! workspace, extract, read labels, transform, package, release the
//! workspace. The workspace is released on every exit path because the
//! pipeline owns it for exactly the scope of the run.

use std::sync::Arc;

use tracing::info;

use super::audio::AudioFamily;
use super::engine::ConversionEngine;
use super::image::ImageFamily;
use super::tiny::TinyImageFamily;
use super::{ModelFamily, ModelType, OutputFormat, RequestContext};
use crate::config::ArtifactNames;
use crate::error::{KilnError, Result};
use crate::workspace::Workspace;
use crate::{archive, metadata};

/// Response payload produced by a successful conversion.
#[derive(Debug)]
pub struct ConversionOutput {
    /// The zip archive to stream back.
    pub archive: Vec<u8>,
    /// Download filename for the Content-Disposition header.
    pub download_name: &'static str,
}

/// Drives every conversion request end-to-end.
pub struct ConversionPipeline {
    engine: Arc<dyn ConversionEngine>,
    families: Vec<Box<dyn ModelFamily>>,
}

impl ConversionPipeline {
    pub fn new(engine: Arc<dyn ConversionEngine>) -> Self {
        Self {
            engine,
            families: vec![
                Box::new(ImageFamily),
                Box::new(AudioFamily),
                Box::new(TinyImageFamily),
            ],
        }
    }

    fn family(&self, model_type: ModelType) -> &dyn ModelFamily {
        self.families
            .iter()
            .find(|f| f.model_type() == model_type)
            .map(|f| f.as_ref())
            .expect("every model type has a registered family")
    }

    /// Convert one uploaded bundle.
    ///
    /// `model_type` and `format` are the raw path parameters; unknown values
    /// and unsupported combinations fail with `UnsupportedFormat`, and
    /// calibrating formats without a dataset fail with `MissingDataset`,
    /// all before any workspace is allocated.
    pub async fn convert(
        &self,
        model_type: &str,
        format: &str,
        model_archive: &[u8],
        dataset_archive: Option<&[u8]>,
    ) -> Result<ConversionOutput> {
        let unsupported = || KilnError::UnsupportedFormat {
            model_type: model_type.to_string(),
            format: format.to_string(),
        };
        let parsed_type = ModelType::parse(model_type).ok_or_else(unsupported)?;
        let parsed_format = OutputFormat::parse(format).ok_or_else(unsupported)?;

        let family = self.family(parsed_type);
        if !family.supports(parsed_format) {
            return Err(unsupported());
        }

        let needs_calibration = family.requires_calibration(parsed_format);
        if needs_calibration && dataset_archive.is_none() {
            return Err(KilnError::MissingDataset {
                format: format.to_string(),
            });
        }

        info!(
            model_type = parsed_type.as_str(),
            format = parsed_format.as_str(),
            "conversion started"
        );

        let workspace = Workspace::acquire()?;
        let result = self
            .run(
                family,
                parsed_format,
                &workspace,
                model_archive,
                dataset_archive,
                needs_calibration,
            )
            .await;
        // Both scratch directories disappear here, success or not.
        drop(workspace);

        match &result {
            Ok(output) => info!(bytes = output.archive.len(), "conversion finished"),
            Err(e) => info!(code = e.code(), "conversion failed: {e}"),
        }
        result
    }

    async fn run(
        &self,
        family: &dyn ModelFamily,
        format: OutputFormat,
        workspace: &Workspace,
        model_archive: &[u8],
        dataset_archive: Option<&[u8]>,
        needs_calibration: bool,
    ) -> Result<ConversionOutput> {
        let model_dir = workspace.model_dir();
        archive::extract_to(model_archive, model_dir)?;

        let model_json = model_dir.join(ArtifactNames::MODEL_JSON);
        if !model_json.is_file() {
            return Err(KilnError::MissingModel(model_json));
        }

        let labels = metadata::read_labels(model_dir, family.label_key())?;
        let label_file = metadata::write_label_index(model_dir, &labels)?;
        info!(labels = ?labels.names(), "labels recovered");

        if needs_calibration {
            let dataset = dataset_archive.expect("dataset presence validated before workspace");
            archive::extract_to(dataset, workspace.data_dir())?;
        }

        let ctx = RequestContext {
            format,
            model_dir,
            data_dir: workspace.data_dir(),
            labels: &labels,
        };
        let artifact = family.convert(&ctx, self.engine.as_ref()).await?;

        let archive_path = model_dir.join(ArtifactNames::RESPONSE_ARCHIVE);
        archive::package(
            artifact.primary(),
            artifact.archive_root(),
            &label_file,
            &archive_path,
        )?;
        let bytes = std::fs::read(&archive_path)
            .map_err(|e| KilnError::io("reading response archive", &archive_path, e))?;

        let download_name = if format == OutputFormat::TinyMl {
            ArtifactNames::SKETCH_DOWNLOAD_NAME
        } else {
            ArtifactNames::DOWNLOAD_NAME
        };
        Ok(ConversionOutput {
            archive: bytes,
            download_name,
        })
    }
}
