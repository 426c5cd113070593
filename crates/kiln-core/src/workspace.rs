//! Per-request scratch directories.
//!
//! Every conversion request owns exactly one [`Workspace`]: a pair of fresh
//! uniquely-named temporary directories, one for the uploaded model bundle
//! and one for the representative dataset. Release is tied to ownership:
//! dropping the workspace removes both directories recursively, on success
//! and on every failure path alike.

use std::path::Path;

use tempfile::TempDir;
use tracing::debug;

use crate::error::{KilnError, Result};

/// Isolated scratch space for one in-flight conversion request.
///
/// Never shared across requests. The directories live under the system
/// temp root, which guarantees unique names under concurrent requests.
#[derive(Debug)]
pub struct Workspace {
    model_dir: TempDir,
    data_dir: TempDir,
}

impl Workspace {
    /// Create two fresh, empty, uniquely-named directories.
    pub fn acquire() -> Result<Self> {
        let model_dir = TempDir::with_prefix("kiln-model-")
            .map_err(|e| KilnError::io("creating model workspace", std::env::temp_dir(), e))?;
        let data_dir = TempDir::with_prefix("kiln-data-")
            .map_err(|e| KilnError::io("creating dataset workspace", std::env::temp_dir(), e))?;

        debug!(
            model_dir = %model_dir.path().display(),
            data_dir = %data_dir.path().display(),
            "workspace acquired"
        );

        Ok(Self {
            model_dir,
            data_dir,
        })
    }

    /// Directory the model bundle is extracted into and artifacts are
    /// written to.
    pub fn model_dir(&self) -> &Path {
        self.model_dir.path()
    }

    /// Directory the representative dataset is extracted into.
    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    /// Delete both directories, surfacing any deletion error.
    ///
    /// Dropping the workspace performs the same cleanup best-effort; call
    /// this when the caller wants the failure reported instead of logged.
    pub fn close(self) -> Result<()> {
        let Self {
            model_dir,
            data_dir,
        } = self;
        let model_path = model_dir.path().to_path_buf();
        let data_path = data_dir.path().to_path_buf();
        model_dir
            .close()
            .map_err(|e| KilnError::io("removing model workspace", model_path, e))?;
        data_dir
            .close()
            .map_err(|e| KilnError::io("removing dataset workspace", data_path, e))?;
        Ok(())
    }
}
