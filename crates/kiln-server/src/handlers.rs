//! Request handlers and error-to-HTTP mapping.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use kiln_core::KilnError;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::server::AppState;

const MEDIA_TYPE: &str = "application/octet-stream";

/// Error payload returned to HTTP callers.
///
/// `code` is the stable machine-readable error kind; clients branch on it,
/// not on the message text.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// Failures surfaced by the HTTP layer.
#[derive(Debug)]
pub enum ApiError {
    Kiln(KilnError),
    MissingField(&'static str),
    Multipart(String),
}

impl From<KilnError> for ApiError {
    fn from(err: KilnError) -> Self {
        ApiError::Kiln(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Kiln(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    error!("conversion error: {e}");
                }
                (
                    status,
                    ErrorBody {
                        error: e.to_string(),
                        code: e.code(),
                    },
                )
            }
            ApiError::MissingField(name) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: format!("multipart field '{name}' is required"),
                    code: "MISSING_FIELD",
                },
            ),
            ApiError::Multipart(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: message,
                    code: "INVALID_MULTIPART",
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Map a pipeline error to its HTTP status.
///
/// Invalid type/format/dataset combinations are 403, matching the contract
/// the browser front-end already handles.
fn status_for(err: &KilnError) -> StatusCode {
    match err {
        KilnError::UnsupportedFormat { .. } | KilnError::MissingDataset { .. } => {
            StatusCode::FORBIDDEN
        }
        KilnError::CorruptArchive { .. } => StatusCode::BAD_REQUEST,
        KilnError::MissingMetadata(_)
        | KilnError::MalformedMetadata { .. }
        | KilnError::MissingModel(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Liveness probe, also used to keep serverless instances warm.
pub async fn handle_keep_warm() -> &'static str {
    "ok"
}

/// Health endpoint exposing the advisory readiness flag.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "ready": state.ready.load(Ordering::SeqCst),
    }))
}

/// Conversion endpoint: multipart `model` (required) and `dataset`
/// (optional) archives in, one artifact archive out.
pub async fn handle_convert(
    State(state): State<Arc<AppState>>,
    Path((model_type, format)): Path<(String, String)>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    state.ready.store(false, Ordering::SeqCst);
    let result = convert_inner(&state, &model_type, &format, multipart).await;
    state.ready.store(true, Ordering::SeqCst);
    result
}

async fn convert_inner(
    state: &AppState,
    model_type: &str,
    format: &str,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut model: Option<Bytes> = None;
    let mut dataset: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("model") => {
                model = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::Multipart(e.to_string()))?,
                )
            }
            Some("dataset") => {
                dataset = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::Multipart(e.to_string()))?,
                )
            }
            // Unknown fields are ignored rather than rejected
            _ => {}
        }
    }

    let model = model.ok_or(ApiError::MissingField("model"))?;

    let output = state
        .pipeline
        .convert(model_type, format, &model, dataset.as_deref())
        .await?;

    let headers = [
        (header::CONTENT_TYPE, MEDIA_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", output.download_name),
        ),
    ];
    Ok((headers, output.archive).into_response())
}
