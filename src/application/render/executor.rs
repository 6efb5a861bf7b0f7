use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::domain::options::PdfOptions;

use super::engine::{EngineError, RenderEngine, RenderSession};
use super::error::RenderError;
use super::gate::{GateConfig, PoolStats, ResourceGate};
use super::worker::WorkerManager;

const SOURCE: &str = "application::render::executor";

const METRIC_RENDER_TOTAL: &str = "pdfsmith_render_total";
const METRIC_RENDER_MS: &str = "pdfsmith_render_ms";

/// Upper bound on a session close; a hung page must not pin its slot.
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub gate: GateConfig,
    pub render_timeout: Duration,
}

/// Entry point of the render pool: admission, worker, session, deadline.
#[derive(Clone)]
pub struct RenderExecutor {
    gate: ResourceGate,
    workers: WorkerManager,
    render_timeout: Duration,
}

impl RenderExecutor {
    pub fn new(engine: Arc<dyn RenderEngine>, config: PoolConfig) -> Self {
        Self {
            gate: ResourceGate::new(config.gate),
            workers: WorkerManager::new(engine),
            render_timeout: config.render_timeout,
        }
    }

    /// Launch the worker ahead of the first request.
    pub async fn start(&self) -> Result<(), RenderError> {
        self.workers.ensure_worker().await.map(drop)?;
        let config = self.gate.config();
        info!(
            target = SOURCE,
            op = "start",
            capacity = config.capacity,
            max_queue = config.max_queue,
            queue_timeout_ms = config.queue_timeout.as_millis() as u64,
            render_timeout_ms = self.render_timeout.as_millis() as u64,
            "Render pool ready"
        );
        Ok(())
    }

    /// Reject queued callers, then close the worker. Renders already holding a
    /// slot run to completion or their deadline.
    pub async fn shutdown(&self) {
        let rejected = self.gate.shutdown();
        self.workers.shutdown().await;
        info!(
            target = SOURCE,
            op = "shutdown",
            rejected,
            "Render pool stopped"
        );
    }

    pub fn stats(&self) -> PoolStats {
        self.gate.stats()
    }

    pub fn worker_connected(&self) -> bool {
        self.workers.is_connected()
    }

    /// Render self-contained HTML into PDF bytes.
    ///
    /// Options are validated before a slot is requested. The slot is released
    /// and the session closed on every exit, including when the returned
    /// future is dropped.
    pub async fn render(&self, html: &str, options: &PdfOptions) -> Result<Vec<u8>, RenderError> {
        options
            .validate()
            .map_err(|err| RenderError::InvalidOptions {
                message: err.to_string(),
            })?;

        let started = Instant::now();
        let result = self.render_with_slot(html, options).await;
        let elapsed = started.elapsed();

        let label = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        counter!(METRIC_RENDER_TOTAL, "result" => label).increment(1);
        histogram!(METRIC_RENDER_MS).record(elapsed.as_secs_f64() * 1000.0);

        match &result {
            Ok(bytes) => debug!(
                target = SOURCE,
                op = "render",
                result = "ok",
                bytes = bytes.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Rendered PDF"
            ),
            Err(err) => warn!(
                target = SOURCE,
                op = "render",
                result = err.kind(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "PDF render failed"
            ),
        }

        result
    }

    async fn render_with_slot(
        &self,
        html: &str,
        options: &PdfOptions,
    ) -> Result<Vec<u8>, RenderError> {
        // Declared first so it drops last, after the session is closed.
        let _permit = self.gate.acquire().await?;

        let worker = self.workers.ensure_worker().await?;
        let session = worker
            .open_session()
            .await
            .map_err(|err| RenderError::session(&err))?;
        let mut session = SessionGuard::new(session);

        let outcome = tokio::time::timeout(self.render_timeout, async {
            let session = session.get_mut()?;
            session.load_content(html).await?;
            session.print_pdf(options).await
        })
        .await;

        session.close().await;

        match outcome {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(err)) => Err(RenderError::session(&err)),
            Err(_elapsed) => {
                warn!(
                    target = SOURCE,
                    op = "render",
                    result = "render_timeout",
                    timeout_ms = self.render_timeout.as_millis() as u64,
                    worker_connected = worker.is_connected(),
                    "Render exceeded deadline; session discarded"
                );
                Err(RenderError::RenderTimeout {
                    timeout: self.render_timeout,
                })
            }
        }
    }
}

/// Closes its session exactly once: explicitly through [`SessionGuard::close`],
/// or on a spawned task when dropped mid-render.
struct SessionGuard {
    session: Option<Box<dyn RenderSession>>,
}

impl SessionGuard {
    fn new(session: Box<dyn RenderSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn get_mut(&mut self) -> Result<&mut Box<dyn RenderSession>, EngineError> {
        self.session
            .as_mut()
            .ok_or_else(|| EngineError::session("render session already closed"))
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            close_session(session).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_session(session));
            }
            Err(_) => warn!(
                target = SOURCE,
                op = "session_close",
                "No runtime available; render session leaked"
            ),
        }
    }
}

async fn close_session(session: Box<dyn RenderSession>) {
    match tokio::time::timeout(SESSION_CLOSE_TIMEOUT, session.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(
            target = SOURCE,
            op = "session_close",
            result = "error",
            error = %err,
            "Failed to close render session"
        ),
        Err(_) => warn!(
            target = SOURCE,
            op = "session_close",
            result = "timeout",
            timeout_ms = SESSION_CLOSE_TIMEOUT.as_millis() as u64,
            "Render session close timed out"
        ),
    }
}
