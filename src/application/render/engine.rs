//! Boundary to the out-of-process rendering engine.
//!
//! The pool never talks to a browser directly. It launches an [`EngineHandle`]
//! through a [`RenderEngine`], opens one [`RenderSession`] per request on that
//! handle, and closes the session before the request returns.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::options::PdfOptions;

/// Failures reported by an engine adapter.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine failed to launch: {0}")]
    Launch(String),
    #[error("engine connection lost: {0}")]
    Disconnected(String),
    #[error("engine session failed: {0}")]
    Session(String),
}

impl EngineError {
    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch(message.into())
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session(message.into())
    }
}

/// Starts engine processes. Implementations must apply their own hardened
/// baseline configuration; callers pass nothing per launch.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn EngineHandle>, EngineError>;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

/// A running engine process shared by every in-flight render.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Whether the engine process is still reachable. Must not block.
    fn is_connected(&self) -> bool;

    async fn open_session(&self) -> Result<Box<dyn RenderSession>, EngineError>;

    /// Terminate the engine process. Safe to call more than once.
    async fn close(&self) -> Result<(), EngineError>;
}

/// An isolated rendering context (one browser page) scoped to a single call.
#[async_trait]
pub trait RenderSession: Send {
    async fn load_content(&mut self, html: &str) -> Result<(), EngineError>;

    async fn print_pdf(&mut self, options: &PdfOptions) -> Result<Vec<u8>, EngineError>;

    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}
