//! Bundle metadata descriptor and label index.
//!
//! Every uploaded bundle carries a `metadata.json` with the ordered class
//! labels the classifier was trained on. The key holding them differs per
//! model family (`labels` for image models, `wordLabels` for audio), so the
//! family strategy supplies it.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ArtifactNames;
use crate::error::{KilnError, Result};

/// Ordered class labels recovered from a bundle's metadata descriptor.
///
/// Label order is significant: it defines the classifier's output index
/// space and drives both the label index file and calibration enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.labels
    }
}

/// Read the ordered label list from `metadata.json` in `model_dir`.
///
/// `key` is the family-specific JSON key holding the label array.
pub fn read_labels(model_dir: &Path, key: &str) -> Result<LabelSet> {
    let descriptor = model_dir.join(ArtifactNames::METADATA_JSON);
    if !descriptor.is_file() {
        return Err(KilnError::MissingMetadata(descriptor));
    }

    let raw = std::fs::read_to_string(&descriptor)
        .map_err(|e| KilnError::io("reading metadata descriptor", &descriptor, e))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| KilnError::MalformedMetadata {
            message: format!("invalid JSON: {e}"),
        })?;

    let entries = value
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| KilnError::MalformedMetadata {
            message: format!("missing '{key}' array"),
        })?;

    let mut labels = Vec::with_capacity(entries.len());
    for entry in entries {
        let label = entry.as_str().ok_or_else(|| KilnError::MalformedMetadata {
            message: format!("'{key}' contains a non-string entry"),
        })?;
        labels.push(label.to_string());
    }

    debug!(count = labels.len(), "labels read from metadata");
    Ok(LabelSet::new(labels))
}

/// Write the plain-text label index into `model_dir`: one
/// `<index> <label>` line per entry, in array order.
///
/// Returns the path of the written file.
pub fn write_label_index(model_dir: &Path, labels: &LabelSet) -> Result<PathBuf> {
    let path = model_dir.join(ArtifactNames::LABELS_FILE);
    let mut file = std::fs::File::create(&path)
        .map_err(|e| KilnError::io("creating label index", &path, e))?;
    for (idx, label) in labels.iter().enumerate() {
        writeln!(file, "{idx} {label}").map_err(|e| KilnError::io("writing label index", &path, e))?;
    }
    Ok(path)
}
