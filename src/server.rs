//! HTTP surface: `POST /parse` and `GET /health`.
//!
//! Handlers read the whole upload into memory, then hand it to
//! [`parse_document`]. Every failure leaves as a [`ParseError`] and is
//! rendered as `{"error": kind, "message": text, "page": n}`.

use crate::config::{parse_bool, parse_u32, ParseConfig, RequestOverrides, ServerConfig};
use crate::error::{ErrorClass, ParseError};
use crate::model::Backend;
use crate::output::ParseResponse;
use crate::parse::{parse_document, UploadedDocument};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    /// Defaults for every request; form fields and query parameters
    /// override them per request.
    pub config: Arc<ParseConfig>,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(backend: Arc<Backend>, config: ParseConfig, server: &ServerConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
            max_upload_bytes: server.max_upload_bytes,
        }
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let limit = state.max_upload_bytes;
    Router::new()
        .route("/parse", post(parse_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<usize>,
}

impl IntoResponse for ParseError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match self.class() {
            ErrorClass::Internal => tracing::error!("Request failed: {:?}", self),
            ErrorClass::Inference | ErrorClass::BackendUnavailable => {
                tracing::warn!("Request failed: {}", self)
            }
            ErrorClass::ClientInput => tracing::debug!("Rejected request: {}", self),
        }

        let body = Json(ErrorBody {
            error: self.kind(),
            message: self.public_message(),
            page: self.page(),
        });
        (status, body).into_response()
    }
}

async fn parse_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ParseResponse>, ParseError> {
    if let Some(reason) = state.backend.unavailable_reason() {
        return Err(ParseError::BackendUnavailable {
            reason: reason.to_string(),
        });
    }

    let mut multipart = multipart.map_err(|e| ParseError::InvalidRequest {
        field: "body".into(),
        reason: e.body_text(),
    })?;

    let limit_mb = state.max_upload_bytes / (1024 * 1024);
    let mut document: Option<UploadedDocument> = None;
    let mut form = RequestOverrides::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit_mb))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| multipart_error(e, limit_mb))?;
                tracing::debug!(
                    "Received file {:?} ({:?}, {} bytes)",
                    filename,
                    content_type,
                    data.len()
                );
                document = Some(UploadedDocument {
                    bytes: data.to_vec(),
                    content_type,
                    filename,
                });
            }
            "detect_tables" | "max_dim" | "dpi" => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit_mb))?;
                apply_param(&mut form, &name, &value)?;
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    let document = document.ok_or(ParseError::MissingFile)?;

    let mut from_query = RequestOverrides::default();
    for (key, value) in &query {
        apply_param(&mut from_query, key, value)?;
    }

    let config = state.config.with_overrides(&form.or(from_query))?;
    let response = parse_document(&state.backend, document, &config).await?;
    Ok(Json(response))
}

fn apply_param(
    overrides: &mut RequestOverrides,
    name: &str,
    value: &str,
) -> Result<(), ParseError> {
    match name {
        "detect_tables" => overrides.detect_tables = Some(parse_bool(name, value)?),
        "max_dim" => overrides.max_dim = Some(parse_u32(name, value)?),
        "dpi" => overrides.dpi = Some(parse_u32(name, value)?),
        _ => {}
    }
    Ok(())
}

fn multipart_error(e: MultipartError, limit_mb: usize) -> ParseError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ParseError::UploadTooLarge { limit_mb }
    } else {
        ParseError::InvalidRequest {
            field: "file".into(),
            reason: e.body_text(),
        }
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    gpu: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthBody>) {
    let backend = &state.backend;
    match backend.unavailable_reason() {
        None => (
            StatusCode::OK,
            Json(HealthBody {
                status: "healthy",
                gpu: if backend.gpu_enabled() { "enabled" } else { "disabled" },
                reason: None,
            }),
        ),
        Some(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthBody {
                status: "unhealthy",
                gpu: "disabled",
                reason: Some(reason.to_string()),
            }),
        ),
    }
}
