use std::time::Duration;

use thiserror::Error;

use super::engine::EngineError;

/// Every way a call to [`RenderExecutor::render`](super::RenderExecutor::render) can fail.
///
/// None of these are retried inside the pool.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("render queue full ({max_queue} waiting); service overloaded")]
    QueueFull { max_queue: usize },
    #[error("timed out after {waited:?} waiting for a render slot")]
    QueueTimeout { waited: Duration },
    #[error("rendering worker failed to launch: {message}")]
    WorkerLaunchFailure { message: String },
    #[error("rendering exceeded the {timeout:?} deadline")]
    RenderTimeout { timeout: Duration },
    #[error("rendering engine reported an error: {message}")]
    SessionError { message: String },
    #[error("render service is shutting down")]
    ServiceShuttingDown,
    #[error("invalid render options: {message}")]
    InvalidOptions { message: String },
}

impl RenderError {
    /// Stable snake_case label for logs, metrics and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::QueueFull { .. } => "queue_full",
            RenderError::QueueTimeout { .. } => "queue_timeout",
            RenderError::WorkerLaunchFailure { .. } => "worker_launch_failure",
            RenderError::RenderTimeout { .. } => "render_timeout",
            RenderError::SessionError { .. } => "session_error",
            RenderError::ServiceShuttingDown => "shutting_down",
            RenderError::InvalidOptions { .. } => "invalid_options",
        }
    }

    pub(crate) fn launch(err: &EngineError) -> Self {
        RenderError::WorkerLaunchFailure {
            message: err.to_string(),
        }
    }

    pub(crate) fn session(err: &EngineError) -> Self {
        RenderError::SessionError {
            message: err.to_string(),
        }
    }
}
