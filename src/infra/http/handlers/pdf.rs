use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::application::documents::DocumentSource;
use crate::domain::options::PdfOptions;
use crate::infra::http::HttpState;
use crate::infra::http::error::ApiError;
use crate::infra::http::middleware::RequestContext;
use crate::infra::storage::files::sanitize_label;

use super::{html_response, json_body, pdf_response};

const SOURCE: &str = "infra::http::pdf";

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    pub template: Option<String>,
    pub html: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub options: Option<PdfOptions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RenderQuery {
    pub output: Option<String>,
}

/// What `POST /pdf/render` hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Merged HTML, no PDF.
    Html,
    /// PDF bytes in the response body.
    Stream,
    /// PDF written to the output directory; a download link is returned.
    Save,
}

impl OutputMode {
    fn from_query(output: Option<&str>) -> Self {
        match output {
            Some("html") => Self::Html,
            Some("stream") => Self::Stream,
            _ => Self::Save,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Stream => "stream",
            Self::Save => "save",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedResponse {
    pub success: bool,
    pub file_name: String,
    pub file_url: String,
    pub file_size: u64,
}

pub async fn render(
    State(state): State<HttpState>,
    Query(query): Query<RenderQuery>,
    Extension(context): Extension<RequestContext>,
    headers: HeaderMap,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;
    let source = DocumentSource::from_parts(request.template, request.html)?;
    let mode = OutputMode::from_query(query.output.as_deref());

    info!(
        target = SOURCE,
        op = "render",
        source = source.label(),
        mode = mode.as_str(),
        client = %context.client,
        "Render request"
    );

    if mode == OutputMode::Html {
        let html = state.documents.render_html(&source, &request.data).await?;
        return Ok(html_response(html));
    }

    let options = request.options.unwrap_or_default();
    let pdf = state
        .documents
        .render_pdf(&source, &request.data, &options)
        .await?;
    let label = sanitize_label(source.label());

    if mode == OutputMode::Stream {
        return Ok(pdf_response(pdf, "inline", &format!("{label}.pdf")));
    }

    let saved = state.files.save(&pdf, &label).await?;
    let body = SavedResponse {
        success: true,
        file_url: file_url(&headers, &saved.file_name),
        file_name: saved.file_name,
        file_size: saved.size,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// `GET /pdf/preview/{template}`: the named template filled with its sample
/// fixture, as HTML.
pub async fn preview(
    State(state): State<HttpState>,
    Path(template): Path<String>,
) -> Result<Response, ApiError> {
    let html = state
        .documents
        .fixture_preview(&template, &state.fixtures_dir)
        .await?;
    info!(
        target = SOURCE,
        op = "preview",
        template = %template,
        "Serving fixture preview"
    );
    Ok(html_response(html))
}

pub async fn download(
    State(state): State<HttpState>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::not_found(format!("File `{file_name}` not found or expired"));
    let path = state.files.resolve(&file_name).await.ok_or_else(not_found)?;
    let bytes = tokio::fs::read(&path).await.map_err(|_| not_found())?;

    let served_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(sanitize_label_keep_extension)
        .unwrap_or_else(|| "document.pdf".to_string());
    info!(
        target = SOURCE,
        op = "download",
        file_name = %served_name,
        "Serving saved document"
    );
    Ok(pdf_response(bytes, "attachment", &served_name))
}

/// Absolute link to a saved file when the request names its host, otherwise
/// a root-relative path.
fn file_url(headers: &HeaderMap, file_name: &str) -> String {
    let path = format!("/pdf/files/{file_name}");
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty());
    let Some(host) = host else {
        return path;
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .filter(|proto| matches!(*proto, "http" | "https"))
        .unwrap_or("http");
    format!("{scheme}://{host}{path}")
}

fn sanitize_label_keep_extension(file_name: &str) -> String {
    match file_name.strip_suffix(".pdf") {
        Some(stem) => format!("{}.pdf", sanitize_label(stem)),
        None => sanitize_label(file_name),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn unknown_output_modes_fall_back_to_save() {
        assert_eq!(OutputMode::from_query(Some("html")), OutputMode::Html);
        assert_eq!(OutputMode::from_query(Some("stream")), OutputMode::Stream);
        assert_eq!(OutputMode::from_query(Some("zip")), OutputMode::Save);
        assert_eq!(OutputMode::from_query(None), OutputMode::Save);
    }

    #[test]
    fn file_url_uses_host_and_forwarded_scheme() {
        let mut headers = HeaderMap::new();
        assert_eq!(file_url(&headers, "a.pdf"), "/pdf/files/a.pdf");

        headers.insert(header::HOST, HeaderValue::from_static("pdf.internal:3000"));
        assert_eq!(
            file_url(&headers, "a.pdf"),
            "http://pdf.internal:3000/pdf/files/a.pdf"
        );

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(
            file_url(&headers, "a.pdf"),
            "https://pdf.internal:3000/pdf/files/a.pdf"
        );
    }
}
