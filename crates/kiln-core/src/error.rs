//! Error types for the kiln conversion service.
//!
//! Every failure the pipeline can report maps to a distinct, stable error
//! code so HTTP callers can tell failure kinds apart by more than message
//! text.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for kiln operations.
#[derive(Debug, Error)]
pub enum KilnError {
    // Request validation errors
    #[error("Unsupported conversion: type '{model_type}' to format '{format}'")]
    UnsupportedFormat { model_type: String, format: String },

    #[error("Format '{format}' requires a representative dataset for quantization calibration")]
    MissingDataset { format: String },

    // Bundle errors
    #[error("Uploaded archive is not a valid zip file: {message}")]
    CorruptArchive { message: String },

    #[error("Model bundle has no metadata descriptor: {0:?}")]
    MissingMetadata(PathBuf),

    #[error("Malformed metadata descriptor: {message}")]
    MalformedMetadata { message: String },

    #[error("Model bundle has no model definition: {0:?}")]
    MissingModel(PathBuf),

    // External tool errors
    #[error("External tool not available: {tool}")]
    ToolUnavailable { tool: String },

    #[error("{tool} failed with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("Conversion environment error: {message}")]
    Environment { message: String },

    // Microcontroller template errors
    #[error("Template {file} has no '${{{placeholder}}}' placeholder")]
    TemplateMissingPlaceholder { file: String, placeholder: String },

    #[error("Template {file} has unresolved placeholder '${{{placeholder}}}'")]
    TemplateUnresolvedPlaceholder { file: String, placeholder: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for kiln operations.
pub type Result<T> = std::result::Result<T, KilnError>;

impl From<std::io::Error> for KilnError {
    fn from(err: std::io::Error) -> Self {
        KilnError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl KilnError {
    /// Create an IO error with operation context and path.
    pub fn io(context: &str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        KilnError::Io {
            message: format!("{context}: {err}"),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Stable machine-readable code for this error kind.
    ///
    /// The HTTP layer includes this in every error payload; codes are part
    /// of the response contract and must not change casually.
    pub fn code(&self) -> &'static str {
        match self {
            KilnError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            KilnError::MissingDataset { .. } => "MISSING_DATASET",
            KilnError::CorruptArchive { .. } => "CORRUPT_ARCHIVE",
            KilnError::MissingMetadata(_) => "MISSING_METADATA",
            KilnError::MalformedMetadata { .. } => "MALFORMED_METADATA",
            KilnError::MissingModel(_) => "MISSING_MODEL",
            KilnError::ToolUnavailable { .. } => "COMPILER_UNAVAILABLE",
            KilnError::ToolFailed { .. } => "EXTERNAL_TOOL_FAILURE",
            KilnError::Environment { .. } => "ENVIRONMENT_ERROR",
            KilnError::TemplateMissingPlaceholder { .. }
            | KilnError::TemplateUnresolvedPlaceholder { .. } => "TEMPLATE_ERROR",
            KilnError::Io { .. } => "IO_ERROR",
            KilnError::Json { .. } => "JSON_ERROR",
        }
    }

    /// Whether the failure was caused by the uploaded request rather than
    /// the service or its tooling.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            KilnError::UnsupportedFormat { .. }
                | KilnError::MissingDataset { .. }
                | KilnError::CorruptArchive { .. }
                | KilnError::MissingMetadata(_)
                | KilnError::MalformedMetadata { .. }
                | KilnError::MissingModel(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KilnError::MissingDataset {
            format: "edgetpu".into(),
        };
        assert_eq!(
            err.to_string(),
            "Format 'edgetpu' requires a representative dataset for quantization calibration"
        );
    }

    #[test]
    fn test_error_codes_distinct_per_kind() {
        let errors = [
            KilnError::UnsupportedFormat {
                model_type: "audio".into(),
                format: "edgetpu".into(),
            },
            KilnError::MissingDataset {
                format: "tinyml".into(),
            },
            KilnError::CorruptArchive {
                message: "bad header".into(),
            },
            KilnError::MissingMetadata(PathBuf::from("/tmp/x/metadata.json")),
            KilnError::MalformedMetadata {
                message: "no labels key".into(),
            },
            KilnError::ToolUnavailable {
                tool: "edgetpu_compiler".into(),
            },
            KilnError::ToolFailed {
                tool: "tensorflowjs_converter".into(),
                status: 1,
                stderr: "boom".into(),
            },
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(KilnError::CorruptArchive {
            message: "x".into()
        }
        .is_client_error());
        assert!(!KilnError::ToolUnavailable {
            tool: "edgetpu_compiler".into()
        }
        .is_client_error());
    }

    #[test]
    fn test_io_helper_keeps_path() {
        let err = KilnError::io(
            "reading bundle",
            "/tmp/work/model.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        match err {
            KilnError::Io { path, .. } => {
                assert_eq!(path, Some(PathBuf::from("/tmp/work/model.json")))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
