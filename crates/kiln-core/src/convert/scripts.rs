//! Embedded Python engine scripts and deployment utilities.
//!
//! The tensor-graph work (Keras export, TFLite conversion, quantization,
//! audio metadata embedding) is delegated to TensorFlow running in a managed
//! virtual environment. Scripts are stored as string constants and written
//! to disk on first use or when the embedded version changes (detected via
//! hash comparison).

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{KilnError, Result};

/// Python requirements for the conversion virtual environment.
pub const REQUIREMENTS: &str = "\
tensorflow>=2.9,<2.16
tensorflowjs>=3.18.0
tflite-support>=0.4.2
pillow>=9.0.0
numpy>=1.23.0
";

/// Export a Keras `.h5` classifier to a SavedModel directory.
pub const EXPORT_SAVED_MODEL_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Export a Keras .h5 classifier to a TensorFlow SavedModel directory."""
import argparse

import tensorflow as tf


def main():
    parser = argparse.ArgumentParser(description="Export Keras model to SavedModel")
    parser.add_argument("--keras", required=True, help="Input .h5 model path")
    parser.add_argument("--output", required=True, help="Output SavedModel directory")
    args = parser.parse_args()

    model = tf.keras.models.load_model(args.keras)
    model.save(args.output)


if __name__ == "__main__":
    main()
"#;

/// Convert a classifier to the TFLite interpreter format.
pub const CONVERT_TFLITE_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Convert a classifier to TFLite.

Modes:
  float      -- plain float32 conversion, no optimization
  dynamic    -- dynamic-range quantization, no calibration data
  calibrated -- full integer quantization driven by a manifest of sample files
"""
import argparse
import sys

import numpy as np
import tensorflow as tf
from PIL import Image


def load_image_sample(path):
    """224x224 RGB sample scaled to [-1, 1], matching browser training."""
    img = Image.open(path).convert("RGB").resize((224, 224))
    array = (np.asarray(img, dtype=np.float32) / 127.5) - 1.0
    return array.reshape(1, 224, 224, 3)


def load_tiny_sample(path):
    """96x96 grayscale sample scaled to [-1, 1]."""
    img = Image.open(path).resize((96, 96)).convert("L")
    array = np.asarray(img, dtype=np.float32).reshape(1, 96, 96, 1)
    return (array / 127.5) - 1.0


def representative_dataset(manifest, profile):
    load = load_image_sample if profile == "image" else load_tiny_sample

    def gen():
        with open(manifest) as f:
            for line in f:
                path = line.strip()
                if path:
                    yield [load(path)]

    return gen


def main():
    parser = argparse.ArgumentParser(description="Convert a classifier to TFLite")
    parser.add_argument("--source", required=True)
    parser.add_argument("--source-format", choices=["saved_model", "keras"], required=True)
    parser.add_argument("--mode", choices=["float", "dynamic", "calibrated"], required=True)
    parser.add_argument("--profile", choices=["image", "tiny"], default="image")
    parser.add_argument("--manifest", help="Calibration sample manifest (calibrated mode)")
    parser.add_argument("--output", required=True)
    args = parser.parse_args()

    if args.source_format == "saved_model":
        converter = tf.lite.TFLiteConverter.from_saved_model(args.source)
    else:
        model = tf.keras.models.load_model(args.source)
        converter = tf.lite.TFLiteConverter.from_keras_model(model)

    if args.mode != "float":
        converter.optimizations = [tf.lite.Optimize.DEFAULT]

    if args.mode == "calibrated":
        if not args.manifest:
            print("calibrated mode requires --manifest", file=sys.stderr)
            sys.exit(2)
        converter.representative_dataset = representative_dataset(args.manifest, args.profile)
        if args.profile == "image":
            converter.inference_input_type = tf.uint8
            converter.inference_output_type = tf.uint8
            converter.allow_custom_ops = True
            converter.change_concat_input_ranges = True
        else:
            converter.inference_input_type = tf.int8
            converter.inference_output_type = tf.int8

    with open(args.output, "wb") as f:
        f.write(converter.convert())


if __name__ == "__main__":
    main()
"#;

/// Convert a browser-trained sound classifier, embedding audio metadata.
pub const CONVERT_AUDIO_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Convert a browser-trained sound classifier to TFLite with metadata.

Prepends the pretrained spectrogram preprocessing model so the exported
model accepts raw audio samples, then embeds audio-classifier metadata and
the label file.
"""
import argparse

import tensorflow as tf
import tensorflowjs as tfjs
from tflite_support.metadata_writers import audio_classifier
from tflite_support.metadata_writers import writer_utils


def main():
    parser = argparse.ArgumentParser(description="Convert sound classifier to TFLite")
    parser.add_argument("--model-json", required=True, help="tfjs layers model.json path")
    parser.add_argument("--preproc", required=True, help="Preprocessing SavedModel directory")
    parser.add_argument("--labels", required=True, help="Label index file to embed")
    parser.add_argument("--sample-rate", type=int, default=44100)
    parser.add_argument("--channels", type=int, default=1)
    parser.add_argument("--output", required=True)
    args = parser.parse_args()

    preproc_model = tf.keras.models.load_model(args.preproc)
    input_length = preproc_model.input_shape[-1]
    classifier = tfjs.converters.load_keras_model(args.model_json)

    combined = tf.keras.Sequential(name="combined_model")
    combined.add(preproc_model)
    combined.add(classifier)
    combined.build([None, input_length])

    converter = tf.lite.TFLiteConverter.from_keras_model(combined)
    plain_path = args.output + ".plain"
    with open(plain_path, "wb") as f:
        f.write(converter.convert())

    writer = audio_classifier.MetadataWriter.create_for_inference(
        writer_utils.load_file(plain_path),
        args.sample_rate,
        args.channels,
        [args.labels],
    )
    writer_utils.save_file(writer.populate(), args.output)


if __name__ == "__main__":
    main()
"#;

/// Compute a short hash of a string for staleness checking.
fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

/// Get the path to the converter scripts directory.
pub fn scripts_dir(data_root: &Path) -> PathBuf {
    data_root.join(EngineConfig::SCRIPTS_DIR_NAME)
}

/// Get the path to the converter virtual environment.
pub fn venv_dir(data_root: &Path) -> PathBuf {
    data_root.join(EngineConfig::VENV_DIR_NAME)
}

/// Get the path to the Python binary inside the converter venv.
pub fn venv_python(data_root: &Path) -> PathBuf {
    venv_dir(data_root).join("bin").join("python")
}

/// Get the path to an entry-point binary installed into the venv, such as
/// `tensorflowjs_converter`.
pub fn venv_tool(data_root: &Path, name: &str) -> PathBuf {
    venv_dir(data_root).join("bin").join(name)
}

/// Deploy embedded scripts to disk if missing or outdated.
///
/// Uses a `.hash` sidecar file to detect when the embedded script has
/// changed and needs to be rewritten.
pub fn ensure_scripts_deployed(data_root: &Path) -> Result<()> {
    let dir = scripts_dir(data_root);
    std::fs::create_dir_all(&dir).map_err(|e| KilnError::io("creating scripts dir", &dir, e))?;

    deploy_script(&dir, "export_saved_model.py", EXPORT_SAVED_MODEL_SCRIPT)?;
    deploy_script(&dir, "convert_tflite.py", CONVERT_TFLITE_SCRIPT)?;
    deploy_script(&dir, "convert_audio.py", CONVERT_AUDIO_SCRIPT)?;
    deploy_script(&dir, "requirements.txt", REQUIREMENTS)?;

    info!("Engine scripts deployed to {}", dir.display());
    Ok(())
}

fn deploy_script(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let script_path = dir.join(filename);
    let hash_path = dir.join(format!("{filename}.hash"));
    let current_hash = content_hash(content);

    // Check if the script is already up to date
    if script_path.exists() {
        if let Ok(stored_hash) = std::fs::read_to_string(&hash_path) {
            if stored_hash.trim() == current_hash {
                return Ok(());
            }
        }
    }

    std::fs::write(&script_path, content)
        .map_err(|e| KilnError::io("writing engine script", &script_path, e))?;
    std::fs::write(&hash_path, &current_hash)
        .map_err(|e| KilnError::io("writing script hash", &hash_path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_deploy_and_redeploy() {
        let root = TempDir::new().unwrap();
        ensure_scripts_deployed(root.path()).unwrap();

        let script = scripts_dir(root.path()).join("convert_tflite.py");
        assert!(script.is_file());
        assert!(scripts_dir(root.path())
            .join("convert_tflite.py.hash")
            .is_file());

        // Tamper with the deployed copy; redeploy must restore it because
        // the hash sidecar no longer matches after we clear it.
        std::fs::write(&script, "tampered").unwrap();
        std::fs::write(scripts_dir(root.path()).join("convert_tflite.py.hash"), "stale").unwrap();
        ensure_scripts_deployed(root.path()).unwrap();
        let content = std::fs::read_to_string(&script).unwrap();
        assert_eq!(content, CONVERT_TFLITE_SCRIPT);
    }

    #[test]
    fn test_deploy_is_idempotent() {
        let root = TempDir::new().unwrap();
        ensure_scripts_deployed(root.path()).unwrap();
        let script = scripts_dir(root.path()).join("export_saved_model.py");
        let first = std::fs::metadata(&script).unwrap().modified().unwrap();
        ensure_scripts_deployed(root.path()).unwrap();
        let second = std::fs::metadata(&script).unwrap().modified().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_venv_paths() {
        let root = PathBuf::from("/srv/kiln");
        assert!(venv_python(&root).ends_with("converter-venv/bin/python"));
        assert!(venv_tool(&root, "tensorflowjs_converter")
            .ends_with("converter-venv/bin/tensorflowjs_converter"));
    }
}
