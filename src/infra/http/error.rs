use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::documents::DocumentError;
use crate::application::error::ErrorReport;
use crate::application::render::RenderError;
use crate::application::templates::TemplateError;
use crate::infra::storage::StorageError;

/// Seconds a client is told to back off after an overload rejection.
const OVERLOAD_RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const TEMPLATE: &str = "template_error";
    pub const STORAGE: &str = "storage_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    hint: Option<String>,
    retry_after: Option<u64>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            hint: None,
            retry_after: None,
            report: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Invalid or missing API key",
        )
        .with_hint("Send the key in the `x-api-key` header")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message)
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        let mut error = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMITED,
            "Rate limit exceeded",
        )
        .with_hint(format!("Retry after {retry_after} seconds"));
        error.retry_after = Some(retry_after);
        error
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    fn internal(code: &'static str, source: &'static str, error: &dyn std::error::Error) -> Self {
        let mut api = Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            code,
            "Internal server error",
        );
        api.report = Some(ErrorReport::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            error,
        ));
        api
    }
}

impl From<RenderError> for ApiError {
    fn from(error: RenderError) -> Self {
        let (status, retry_after) = match &error {
            RenderError::QueueFull { .. } | RenderError::ServiceShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                Some(OVERLOAD_RETRY_AFTER_SECS),
            ),
            RenderError::QueueTimeout { .. } | RenderError::RenderTimeout { .. } => {
                (StatusCode::GATEWAY_TIMEOUT, None)
            }
            RenderError::WorkerLaunchFailure { .. } => (StatusCode::BAD_GATEWAY, None),
            RenderError::SessionError { .. } => (StatusCode::UNPROCESSABLE_ENTITY, None),
            RenderError::InvalidOptions { .. } => (StatusCode::BAD_REQUEST, None),
        };
        let mut api = Self::new(status, error.kind(), error.to_string());
        api.retry_after = retry_after;
        api.report = Some(ErrorReport::from_error(
            "application::render",
            status,
            &error,
        ));
        api
    }
}

impl From<TemplateError> for ApiError {
    fn from(error: TemplateError) -> Self {
        match &error {
            TemplateError::NotFound { name } => {
                Self::not_found(format!("Template `{name}` not found"))
            }
            TemplateError::Compile { .. }
            | TemplateError::Render { .. }
            | TemplateError::QrCode { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::TEMPLATE,
                error.to_string(),
            ),
            TemplateError::Io { .. } => {
                Self::internal(codes::TEMPLATE, "application::templates", &error)
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match &error {
            StorageError::NotFound { name } => Self::not_found(format!("`{name}` not found")),
            _ => Self::internal(codes::STORAGE, "infra::storage", &error),
        }
    }
}

impl From<DocumentError> for ApiError {
    fn from(error: DocumentError) -> Self {
        match error {
            DocumentError::Template(err) => err.into(),
            DocumentError::Render(err) => err.into(),
            DocumentError::Storage(err) => err.into(),
            DocumentError::Invalid(message) => Self::bad_request(message),
            fixture @ DocumentError::Fixture { .. } => {
                Self::internal(codes::TEMPLATE, "application::documents", &fixture)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = match self.hint.as_deref() {
            Some(hint) => format!("{}: {} ({hint})", self.code, self.message),
            None => format!("{}: {}", self.code, self.message),
        };
        let report = self
            .report
            .unwrap_or_else(|| ErrorReport::from_message("infra::http", self.status, detail));
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                hint: self.hint,
            },
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        // Picked up by the response logger.
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn render_failures_map_to_distinct_statuses() {
        let cases = [
            (
                RenderError::QueueFull { max_queue: 20 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                RenderError::ServiceShuttingDown,
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                RenderError::QueueTimeout {
                    waited: Duration::from_secs(60),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                RenderError::RenderTimeout {
                    timeout: Duration::from_secs(30),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                RenderError::WorkerLaunchFailure {
                    message: "no chrome".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                RenderError::SessionError {
                    message: "bad markup".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                RenderError::InvalidOptions {
                    message: "margin".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (error, status) in cases {
            let kind = error.kind();
            let api = ApiError::from(error);
            assert_eq!(api.status(), status, "{kind}");
            assert_eq!(api.code(), kind);
        }
    }

    #[test]
    fn overload_sets_retry_after() {
        let response = ApiError::from(RenderError::QueueFull { max_queue: 20 }).into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from_static("5"))
        );
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn storage_internals_are_not_exposed() {
        let api = ApiError::from(StorageError::Io(std::io::Error::other("disk on fire")));
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "Internal server error");
    }
}
