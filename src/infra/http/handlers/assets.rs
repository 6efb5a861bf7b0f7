use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::infra::http::HttpState;
use crate::infra::http::error::ApiError;

/// Serve files from the assets directory so templates can be previewed in a
/// browser with their `/assets/...` references intact.
pub async fn serve_asset(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    let Some(bytes) = state.assets.read(&path).await else {
        return ApiError::not_found(format!("Asset `{path}` not found")).into_response();
    };

    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );
    response
}
