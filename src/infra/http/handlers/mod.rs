pub mod assets;
pub mod health;
pub mod pdf;
pub mod templates;

use axum::{
    Json,
    body::Body,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};

use super::error::ApiError;

/// Unwrap a JSON body, turning extractor rejections into API errors.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Merged markup for viewing in a browser.
pub(crate) fn html_response(html: String) -> Response {
    let mut response = Response::new(Body::from(html));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// A PDF body with download headers. `disposition` is `inline` or
/// `attachment`; `file_name` must already be header-safe.
pub(crate) fn pdf_response(bytes: Vec<u8>, disposition: &str, file_name: &str) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&format!("{disposition}; filename=\"{file_name}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
