//! Designer template CRUD plus preview and render.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::templates::{NewTemplate, TemplatePatch};
use crate::infra::http::HttpState;
use crate::infra::http::error::ApiError;
use crate::infra::storage::files::sanitize_label;

use super::{json_body, pdf_response};

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct RenderStoredRequest {
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
}

pub async fn list(State(state): State<HttpState>) -> Result<Response, ApiError> {
    let summaries = state.documents.store().list().await?;
    Ok(Json(summaries).into_response())
}

pub async fn get(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let template = state.documents.store().get(&id).await?;
    Ok(Json(template).into_response())
}

pub async fn create(
    State(state): State<HttpState>,
    payload: Result<Json<NewTemplate>, JsonRejection>,
) -> Result<Response, ApiError> {
    let new = json_body(payload)?;
    new.validate()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let template = state.documents.store().create(new).await?;
    Ok((StatusCode::CREATED, Json(template)).into_response())
}

pub async fn update(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    payload: Result<Json<TemplatePatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let patch = json_body(payload)?;
    patch
        .validate()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let template = state.documents.store().update(&id, patch).await?;
    Ok(Json(template).into_response())
}

pub async fn delete(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.documents.store().delete(&id).await?;
    Ok(Json(DeletedResponse { success: true }).into_response())
}

pub async fn preview(
    State(state): State<HttpState>,
    payload: Result<Json<PreviewRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;
    let pdf = state
        .documents
        .preview(&request.html, &request.css, &request.data)
        .await?;
    Ok(pdf_response(pdf, "inline", "preview.pdf"))
}

pub async fn render(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    // The body is optional; an empty one renders with no data.
    let data = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice::<RenderStoredRequest>(&body)
            .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))?
            .data
    };
    let (template, pdf) = state.documents.render_stored(&id, &data).await?;
    let file_name = format!("template-{}.pdf", sanitize_label(&template.id));
    Ok(pdf_response(pdf, "inline", &file_name))
}
