//! Centralized configuration for the kiln conversion service.
//!
//! Fixed artifact names, engine timeouts, and calibration constants live
//! here so the pipeline stages and the HTTP layer agree on them.

use std::time::Duration;

/// Names of files the pipeline reads from and writes into a request
/// workspace. These are part of the bundle/response contract.
pub struct ArtifactNames;

impl ArtifactNames {
    /// Model definition inside an uploaded bundle.
    pub const MODEL_JSON: &'static str = "model.json";
    /// Metadata descriptor inside an uploaded bundle.
    pub const METADATA_JSON: &'static str = "metadata.json";
    /// Label index file included in every response archive.
    pub const LABELS_FILE: &'static str = "labels.txt";

    pub const KERAS_MODEL: &'static str = "keras_model.h5";
    pub const SAVED_MODEL_DIR: &'static str = "model.savedmodel";
    pub const TFLITE_FLOAT: &'static str = "model_unquant.tflite";
    pub const TFLITE_QUANTIZED: &'static str = "model.tflite";
    pub const TFLITE_EDGETPU: &'static str = "model_edgetpu.tflite";
    pub const TFLITE_TINY: &'static str = "vww_96_grayscale_quantized.tflite";
    pub const AUDIO_TFLITE: &'static str = "soundclassifier.tflite";
    pub const AUDIO_TFLITE_WITH_METADATA: &'static str = "soundclassifier_with_metadata.tflite";

    /// Calibration manifest handed to the quantization script.
    pub const CALIBRATION_MANIFEST: &'static str = "calibration_samples.txt";
    /// Microcontroller sketch directory inside the workspace.
    pub const SKETCH_DIR: &'static str = "sketch";
    /// Response archive, written into the model workspace before streaming.
    pub const RESPONSE_ARCHIVE: &'static str = "response.zip";

    /// Download filename for ordinary conversions.
    pub const DOWNLOAD_NAME: &'static str = "converted_model.zip";
    /// Download filename for the microcontroller source bundle.
    pub const SKETCH_DOWNLOAD_NAME: &'static str = "arduino_sketch.zip";
}

/// External engine invocation limits and layout.
pub struct EngineConfig;

impl EngineConfig {
    /// Timeout for a single model conversion subprocess.
    pub const CONVERSION_TIMEOUT: Duration = Duration::from_secs(600);
    /// Timeout for the Edge TPU ahead-of-time compiler.
    pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(120);
    /// Timeout for environment setup steps (venv creation, pip install).
    pub const SETUP_TIMEOUT: Duration = Duration::from_secs(900);

    pub const SCRIPTS_DIR_NAME: &'static str = "converter-scripts";
    pub const VENV_DIR_NAME: &'static str = "converter-venv";
}

/// Constants baked into the audio conversion path.
pub struct AudioConfig;

impl AudioConfig {
    /// Sample rate the browser-trained audio models were recorded at.
    pub const SAMPLE_RATE: u32 = 44_100;
    /// Microphone channel count.
    pub const CHANNELS: u32 = 1;
}

/// HTTP server defaults; the binary exposes these as CLI flags.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";
    /// Default multipart body limit. Uploaded bundles are small, but weight
    /// shards for image models can reach tens of megabytes.
    pub const DEFAULT_BODY_LIMIT_BYTES: usize = 256 * 1024 * 1024;
}
