//! Representative-dataset enumeration for quantization calibration.
//!
//! Quantized output formats need a calibration pass over example inputs.
//! The uploaded dataset archive holds one subfolder per label; this module
//! enumerates every non-hidden file across those folders exactly once,
//! labels in their metadata order and files in sorted name order.
//!
//! The iterator is lazy (each folder is listed only when reached) and
//! deliberately not restartable: it is consumed by value, and a second pass
//! requires re-opening the dataset.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{KilnError, Result};
use crate::metadata::LabelSet;

/// One-pass enumeration of calibration sample paths.
#[derive(Debug)]
pub struct RepresentativeDataset {
    data_dir: PathBuf,
    labels: Vec<String>,
    next_label: usize,
    current: std::vec::IntoIter<PathBuf>,
    fused: bool,
}

impl RepresentativeDataset {
    /// Open the dataset rooted at `data_dir` for the given labels.
    ///
    /// No folder is read until iteration reaches it.
    pub fn open(data_dir: &Path, labels: &LabelSet) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            labels: labels.names().to_vec(),
            next_label: 0,
            current: Vec::new().into_iter(),
            fused: false,
        }
    }

    /// Drain the iterator into a manifest file: one sample path per line,
    /// in enumeration order. The manifest is what the external quantizer
    /// script reads its calibration inputs from.
    ///
    /// Returns the number of samples written.
    pub fn write_manifest(self, manifest_path: &Path) -> Result<usize> {
        let mut file = std::fs::File::create(manifest_path)
            .map_err(|e| KilnError::io("creating calibration manifest", manifest_path, e))?;
        let mut count = 0usize;
        for sample in self {
            let sample = sample?;
            writeln!(file, "{}", sample.display())
                .map_err(|e| KilnError::io("writing calibration manifest", manifest_path, e))?;
            count += 1;
        }
        debug!(count, manifest = %manifest_path.display(), "calibration manifest written");
        Ok(count)
    }

    /// List the next label folder: sorted file names, hidden entries and
    /// subdirectories skipped.
    fn list_folder(&self, label: &str) -> Result<Vec<PathBuf>> {
        let folder = self.data_dir.join(label);
        let entries = std::fs::read_dir(&folder)
            .map_err(|e| KilnError::io("listing calibration folder", &folder, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KilnError::io("reading calibration entry", &folder, e))?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Iterator for RepresentativeDataset {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        loop {
            if let Some(path) = self.current.next() {
                return Some(Ok(path));
            }
            if self.next_label >= self.labels.len() {
                return None;
            }
            let label = self.labels[self.next_label].clone();
            self.next_label += 1;
            match self.list_folder(&label) {
                Ok(files) => self.current = files.into_iter(),
                Err(e) => {
                    // A missing or unreadable label folder ends the pass.
                    self.fused = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
