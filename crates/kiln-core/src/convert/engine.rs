//! External conversion engine seam.
//!
//! Every tensor-graph operation the pipeline needs is expressed as a method
//! on [`ConversionEngine`]; the production implementation,
//! [`PythonEngine`], shells out to TensorFlow tooling in a managed virtual
//! environment and to the system Edge TPU compiler. The pipeline never
//! inspects model internals itself.
//!
//! Every invocation is awaited with a timeout, its exit status checked, and
//! its stderr captured into the returned error. A subprocess can fail, but
//! it cannot fail silently or hang the service forever.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::scripts;
use crate::config::{AudioConfig, EngineConfig};
use crate::error::{KilnError, Result};

/// Calibration preprocessing profile for full-integer quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationProfile {
    /// 224x224 RGB samples, uint8 inference IO, from a SavedModel source.
    ImageRgb224,
    /// 96x96 grayscale samples, int8 inference IO, from a Keras source.
    TinyGrayscale96,
}

impl CalibrationProfile {
    fn profile_arg(&self) -> &'static str {
        match self {
            CalibrationProfile::ImageRgb224 => "image",
            CalibrationProfile::TinyGrayscale96 => "tiny",
        }
    }

    fn source_format_arg(&self) -> &'static str {
        match self {
            CalibrationProfile::ImageRgb224 => "saved_model",
            CalibrationProfile::TinyGrayscale96 => "keras",
        }
    }
}

/// Inputs for a full-integer quantization run.
#[derive(Debug, Clone)]
pub struct QuantizationSpec {
    /// SavedModel directory or Keras `.h5` file, per the profile.
    pub source: PathBuf,
    pub profile: CalibrationProfile,
    /// Manifest of calibration sample paths, one per line.
    pub manifest: PathBuf,
    pub output: PathBuf,
}

/// Opaque tensor-graph operations the pipeline delegates.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Convert a tfjs layers model to a Keras `.h5` file.
    async fn layers_to_keras(&self, model_json: &Path, output: &Path) -> Result<()>;

    /// Export a Keras model to a SavedModel directory.
    async fn keras_to_saved_model(&self, keras_model: &Path, output_dir: &Path) -> Result<()>;

    /// Float-precision TFLite conversion from a SavedModel; no calibration.
    async fn saved_model_to_tflite(&self, saved_model_dir: &Path, output: &Path) -> Result<()>;

    /// Dynamic-range quantized TFLite conversion from a Keras model; no
    /// calibration data needed.
    async fn keras_to_tflite_dynamic(&self, keras_model: &Path, output: &Path) -> Result<()>;

    /// Full-integer quantization driven by a representative-dataset
    /// manifest.
    async fn quantize(&self, spec: &QuantizationSpec) -> Result<()>;

    /// Ahead-of-time compile a quantized TFLite model for the Edge TPU.
    /// The compiler writes `<stem>_edgetpu.tflite` into `output_dir`.
    async fn compile_edgetpu(&self, quantized_model: &Path, output_dir: &Path) -> Result<()>;

    /// Audio path: combine the pretrained preprocessing model with the
    /// uploaded classifier and embed audio-classifier metadata plus the
    /// label file.
    async fn convert_audio(&self, model_json: &Path, label_index: &Path, output: &Path)
        -> Result<()>;
}

/// Production engine: TensorFlow tooling in a dedicated virtualenv plus the
/// system `edgetpu_compiler`.
#[derive(Debug, Clone)]
pub struct PythonEngine {
    data_root: PathBuf,
    preproc_model_dir: PathBuf,
}

impl PythonEngine {
    /// `data_root` holds the deployed scripts and the virtualenv;
    /// `preproc_model_dir` is the pretrained audio preprocessing SavedModel.
    pub fn new(data_root: impl Into<PathBuf>, preproc_model_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            preproc_model_dir: preproc_model_dir.into(),
        }
    }

    /// Check if the conversion environment is ready.
    pub fn is_environment_ready(&self) -> bool {
        scripts::venv_python(&self.data_root).exists()
    }

    /// Whether the audio preprocessing model is present on disk.
    pub fn has_preproc_model(&self) -> bool {
        self.preproc_model_dir.is_dir()
    }

    /// Ensure the conversion environment is set up.
    ///
    /// Deploys the embedded scripts and creates the virtual environment
    /// with the required packages if needed.
    pub async fn ensure_environment(&self) -> Result<()> {
        scripts::ensure_scripts_deployed(&self.data_root)?;

        let venv_path = scripts::venv_dir(&self.data_root);
        let python_path = scripts::venv_python(&self.data_root);

        if python_path.exists() {
            debug!("Conversion venv already exists at {}", venv_path.display());
            return Ok(());
        }

        info!("Creating conversion virtual environment at {}", venv_path.display());

        let output = Command::new("python3")
            .args(["-m", "venv", &venv_path.to_string_lossy()])
            .output()
            .await
            .map_err(|e| KilnError::Environment {
                message: format!("Failed to create venv. Ensure python3 is installed: {e}"),
            })?;
        if !output.status.success() {
            return Err(KilnError::Environment {
                message: format!(
                    "Failed to create Python venv: {}",
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        let output = Command::new(&python_path)
            .args(["-m", "pip", "install", "--upgrade", "pip"])
            .output()
            .await
            .map_err(|e| KilnError::Environment {
                message: format!("Failed to upgrade pip: {e}"),
            })?;
        if !output.status.success() {
            warn!(
                "pip upgrade failed (non-fatal): {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let requirements = scripts::scripts_dir(&self.data_root).join("requirements.txt");
        info!("Installing conversion dependencies...");

        let mut cmd = Command::new(&python_path);
        cmd.args(["-m", "pip", "install", "-r", &requirements.to_string_lossy()]);
        run_checked("pip install", cmd, EngineConfig::SETUP_TIMEOUT).await?;

        info!("Conversion environment ready");
        Ok(())
    }

    fn script(&self, name: &str) -> PathBuf {
        scripts::scripts_dir(&self.data_root).join(name)
    }

    fn python(&self) -> PathBuf {
        scripts::venv_python(&self.data_root)
    }
}

#[async_trait]
impl ConversionEngine for PythonEngine {
    async fn layers_to_keras(&self, model_json: &Path, output: &Path) -> Result<()> {
        info!("Converting layers model to Keras: {}", model_json.display());
        let mut cmd = Command::new(scripts::venv_tool(&self.data_root, "tensorflowjs_converter"));
        cmd.arg("--input_format")
            .arg("tfjs_layers_model")
            .arg("--output_format")
            .arg("keras")
            .arg(model_json)
            .arg(output);
        run_checked("tensorflowjs_converter", cmd, EngineConfig::CONVERSION_TIMEOUT).await
    }

    async fn keras_to_saved_model(&self, keras_model: &Path, output_dir: &Path) -> Result<()> {
        info!("Exporting Keras model to SavedModel: {}", output_dir.display());
        let mut cmd = Command::new(self.python());
        cmd.arg(self.script("export_saved_model.py"))
            .arg("--keras")
            .arg(keras_model)
            .arg("--output")
            .arg(output_dir);
        run_checked("export_saved_model", cmd, EngineConfig::CONVERSION_TIMEOUT).await
    }

    async fn saved_model_to_tflite(&self, saved_model_dir: &Path, output: &Path) -> Result<()> {
        info!("Converting SavedModel to float TFLite: {}", output.display());
        let mut cmd = Command::new(self.python());
        cmd.arg(self.script("convert_tflite.py"))
            .arg("--source")
            .arg(saved_model_dir)
            .arg("--source-format")
            .arg("saved_model")
            .arg("--mode")
            .arg("float")
            .arg("--output")
            .arg(output);
        run_checked("convert_tflite", cmd, EngineConfig::CONVERSION_TIMEOUT).await
    }

    async fn keras_to_tflite_dynamic(&self, keras_model: &Path, output: &Path) -> Result<()> {
        info!("Converting Keras model to dynamic-range TFLite: {}", output.display());
        let mut cmd = Command::new(self.python());
        cmd.arg(self.script("convert_tflite.py"))
            .arg("--source")
            .arg(keras_model)
            .arg("--source-format")
            .arg("keras")
            .arg("--mode")
            .arg("dynamic")
            .arg("--output")
            .arg(output);
        run_checked("convert_tflite", cmd, EngineConfig::CONVERSION_TIMEOUT).await
    }

    async fn quantize(&self, spec: &QuantizationSpec) -> Result<()> {
        info!(
            profile = spec.profile.profile_arg(),
            "Quantizing with representative dataset: {}",
            spec.output.display()
        );
        let mut cmd = Command::new(self.python());
        cmd.arg(self.script("convert_tflite.py"))
            .arg("--source")
            .arg(&spec.source)
            .arg("--source-format")
            .arg(spec.profile.source_format_arg())
            .arg("--mode")
            .arg("calibrated")
            .arg("--profile")
            .arg(spec.profile.profile_arg())
            .arg("--manifest")
            .arg(&spec.manifest)
            .arg("--output")
            .arg(&spec.output);
        run_checked("convert_tflite", cmd, EngineConfig::CONVERSION_TIMEOUT).await
    }

    async fn compile_edgetpu(&self, quantized_model: &Path, output_dir: &Path) -> Result<()> {
        info!("Compiling for Edge TPU: {}", quantized_model.display());
        let mut cmd = Command::new("edgetpu_compiler");
        cmd.arg("-s").arg(quantized_model).arg("-o").arg(output_dir);
        run_checked("edgetpu_compiler", cmd, EngineConfig::COMPILE_TIMEOUT).await
    }

    async fn convert_audio(
        &self,
        model_json: &Path,
        label_index: &Path,
        output: &Path,
    ) -> Result<()> {
        info!("Converting sound classifier: {}", output.display());
        let mut cmd = Command::new(self.python());
        cmd.arg(self.script("convert_audio.py"))
            .arg("--model-json")
            .arg(model_json)
            .arg("--preproc")
            .arg(&self.preproc_model_dir)
            .arg("--labels")
            .arg(label_index)
            .arg("--sample-rate")
            .arg(AudioConfig::SAMPLE_RATE.to_string())
            .arg("--channels")
            .arg(AudioConfig::CHANNELS.to_string())
            .arg("--output")
            .arg(output);
        run_checked("convert_audio", cmd, EngineConfig::CONVERSION_TIMEOUT).await
    }
}

/// Run a tool to completion, enforcing a timeout and a zero exit status.
///
/// A missing binary maps to `ToolUnavailable`; any other failure carries the
/// tool name, exit status, and captured stderr.
async fn run_checked(tool: &str, mut cmd: Command, timeout: Duration) -> Result<()> {
    cmd.kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(KilnError::ToolUnavailable {
                tool: tool.to_string(),
            })
        }
        Ok(Err(e)) => {
            return Err(KilnError::ToolFailed {
                tool: tool.to_string(),
                status: -1,
                stderr: format!("process error: {e}"),
            })
        }
        Err(_) => {
            return Err(KilnError::ToolFailed {
                tool: tool.to_string(),
                status: -1,
                stderr: format!("timed out after {}s", timeout.as_secs()),
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!("[{tool}] stdout: {}", stdout.trim());
    }

    if !output.status.success() {
        return Err(KilnError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
