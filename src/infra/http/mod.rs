//! HTTP surface: document rendering, saved file downloads, designer template
//! management and health.

mod error;
mod handlers;
mod middleware;
mod rate_limit;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::warn;

use crate::application::documents::DocumentService;
use crate::infra::assets::AssetInliner;
use crate::infra::storage::FileStorage;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage};
pub use rate_limit::{ApiRateLimiter, RateDecision};

/// Request bodies carry whole HTML documents, often with inlined images.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Previews are opened straight in a browser; inlined assets arrive as
/// `data:` URIs and templates carry their own `<style>` blocks.
const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self'; \
    style-src 'self' 'unsafe-inline'; font-src 'self' data:; \
    img-src 'self' data: blob:; connect-src 'self'; object-src 'none'; \
    base-uri 'self'; frame-ancestors 'self'";

#[derive(Clone)]
pub struct HttpState {
    pub documents: DocumentService,
    pub files: Arc<FileStorage>,
    pub assets: Arc<AssetInliner>,
    pub api_key: Option<Arc<str>>,
    pub rate_limiter: Arc<ApiRateLimiter>,
    /// Attribute requests to the first `X-Forwarded-For` hop.
    pub trust_forwarded_for: bool,
    /// Credentialed CORS origins; empty allows any origin.
    pub cors_origins: Arc<[String]>,
    pub fixtures_dir: Arc<Path>,
    pub started_at: Instant,
}

/// Build the full application router.
///
/// `/pdf/*` and `/api/*` sit behind the API key guard and the rate limiter;
/// `/`, `/health` and `/assets/*` are open. CORS preflights are answered
/// before either guard runs.
pub fn build_router(state: HttpState) -> Router {
    let guarded = Router::new()
        .route("/pdf/render", post(handlers::pdf::render))
        .route("/pdf/preview/{template}", get(handlers::pdf::preview))
        .route("/pdf/files/{file_name}", get(handlers::pdf::download))
        .route(
            "/api/templates",
            get(handlers::templates::list).post(handlers::templates::create),
        )
        .route("/api/templates/preview", post(handlers::templates::preview))
        .route(
            "/api/templates/{id}",
            get(handlers::templates::get)
                .put(handlers::templates::update)
                .delete(handlers::templates::delete),
        )
        .route(
            "/api/templates/{id}/render",
            post(handlers::templates::render),
        )
        // Layers run bottom-up: the key check happens before a request counts
        // against the limit.
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));

    let open = Router::new()
        .route("/", get(handlers::health::index))
        .route("/health", get(handlers::health::health))
        .route("/assets/{*path}", get(handlers::assets::serve_asset));

    let cors = cors_layer(&state.cors_origins);
    open.merge(guarded)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::set_request_context,
        ))
}

/// Credentialed CORS for the configured origins, or any origin without
/// credentials when none are configured.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    target = "pdfsmith::http",
                    origin = %origin,
                    error = %err,
                    "Skipping unusable CORS origin"
                );
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(middleware::API_KEY_HEADER),
        ])
        .expose_headers([
            header::CONTENT_DISPOSITION,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
        ])
}
