//! Ownership of the single shared rendering worker.
//!
//! At most one launch is ever in flight. Callers that find the worker missing
//! or disconnected join the in-flight launch when there is one and start it
//! otherwise. The launch runs on its own task, so it finishes and clears its
//! slot even when every caller waiting on it has gone away.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use tracing::{error, info, warn};

use crate::util::lock::mutex_lock;

use super::engine::{EngineHandle, RenderEngine};
use super::error::RenderError;

const SOURCE: &str = "application::render::worker";

const METRIC_WORKER_LAUNCH: &str = "pdfsmith_worker_launch_total";

type LaunchResult = Result<Arc<dyn EngineHandle>, RenderError>;
type LaunchOperation = Shared<BoxFuture<'static, LaunchResult>>;

#[derive(Default)]
struct LaunchState {
    current: Option<Arc<dyn EngineHandle>>,
    in_flight: Option<LaunchOperation>,
    launches: u64,
    closed: bool,
}

#[derive(Clone)]
pub struct WorkerManager {
    engine: Arc<dyn RenderEngine>,
    state: Arc<Mutex<LaunchState>>,
}

impl WorkerManager {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            engine,
            state: Arc::new(Mutex::new(LaunchState::default())),
        }
    }

    /// Return the live worker, launching a replacement when it is missing or
    /// disconnected. Concurrent callers share one launch and its outcome.
    pub async fn ensure_worker(&self) -> Result<Arc<dyn EngineHandle>, RenderError> {
        let launch = {
            let mut state = mutex_lock(&self.state, SOURCE, "ensure_worker");
            if state.closed {
                return Err(RenderError::ServiceShuttingDown);
            }
            if let Some(worker) = state.current.as_ref().filter(|w| w.is_connected()) {
                return Ok(Arc::clone(worker));
            }
            match state.in_flight.as_ref() {
                Some(launch) => launch.clone(),
                None => {
                    warn!(
                        target = SOURCE,
                        op = "ensure_worker",
                        engine = self.engine.name(),
                        had_worker = state.current.is_some(),
                        "Rendering worker unavailable; relaunching"
                    );
                    self.begin_launch(&mut state)
                }
            }
        };

        launch.await
    }

    /// Start a fresh worker unless a launch is already running, in which case
    /// join it. A connected worker is replaced.
    pub async fn launch(&self) -> Result<(), RenderError> {
        let launch = {
            let mut state = mutex_lock(&self.state, SOURCE, "launch");
            if state.closed {
                return Err(RenderError::ServiceShuttingDown);
            }
            match state.in_flight.as_ref() {
                Some(launch) => launch.clone(),
                None => self.begin_launch(&mut state),
            }
        };

        launch.await.map(drop)
    }

    /// Refuse further launches and close the current worker. Idempotent; a
    /// launch still running closes its worker as soon as it lands.
    pub async fn shutdown(&self) {
        let worker = {
            let mut state = mutex_lock(&self.state, SOURCE, "shutdown");
            state.closed = true;
            state.current.take()
        };

        if let Some(worker) = worker {
            close_worker(worker, "shutdown").await;
            info!(
                target = SOURCE,
                op = "shutdown",
                engine = self.engine.name(),
                "Rendering worker closed"
            );
        }
    }

    pub fn is_connected(&self) -> bool {
        let state = mutex_lock(&self.state, SOURCE, "is_connected");
        state
            .current
            .as_ref()
            .is_some_and(|worker| worker.is_connected())
    }

    /// Launch attempts started so far.
    pub fn launch_count(&self) -> u64 {
        mutex_lock(&self.state, SOURCE, "launch_count").launches
    }

    /// Must be called with the state lock held and no launch in flight.
    fn begin_launch(&self, state: &mut LaunchState) -> LaunchOperation {
        debug_assert!(state.in_flight.is_none());

        if let Some(stale) = state.current.take() {
            tokio::spawn(close_worker(stale, "replace_stale"));
        }
        state.launches += 1;
        let attempt = state.launches;

        let engine = Arc::clone(&self.engine);
        let shared_state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let started = Instant::now();
            info!(
                target = SOURCE,
                op = "launch",
                engine = engine.name(),
                attempt,
                "Launching rendering worker"
            );
            let launched = engine.launch().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let (outcome, orphan) = {
                let mut state = mutex_lock(&shared_state, SOURCE, "launch_complete");
                state.in_flight = None;
                match launched {
                    Ok(worker) if state.closed => {
                        (Err(RenderError::ServiceShuttingDown), Some(worker))
                    }
                    Ok(worker) => {
                        state.current = Some(Arc::clone(&worker));
                        (Ok(worker), None)
                    }
                    Err(err) => (Err(RenderError::launch(&err)), None),
                }
            };

            match &outcome {
                Ok(_) => {
                    counter!(METRIC_WORKER_LAUNCH, "result" => "ok").increment(1);
                    info!(
                        target = SOURCE,
                        op = "launch",
                        result = "ok",
                        attempt,
                        elapsed_ms,
                        "Rendering worker launched"
                    );
                }
                Err(err) => {
                    counter!(METRIC_WORKER_LAUNCH, "result" => err.kind()).increment(1);
                    error!(
                        target = SOURCE,
                        op = "launch",
                        result = err.kind(),
                        attempt,
                        elapsed_ms,
                        error = %err,
                        "Rendering worker launch failed"
                    );
                }
            }

            if let Some(worker) = orphan {
                close_worker(worker, "launch_after_shutdown").await;
            }

            outcome
        });

        let launch: LaunchOperation = async move {
            task.await.unwrap_or_else(|join_err| {
                Err(RenderError::WorkerLaunchFailure {
                    message: format!("launch task aborted: {join_err}"),
                })
            })
        }
        .boxed()
        .shared();

        state.in_flight = Some(launch.clone());
        launch
    }
}

async fn close_worker(worker: Arc<dyn EngineHandle>, op: &'static str) {
    if let Err(err) = worker.close().await {
        warn!(
            target = SOURCE,
            op,
            error = %err,
            "Failed to close rendering worker"
        );
    }
}
