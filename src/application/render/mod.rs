//! Bounded, crash-tolerant access to the shared PDF rendering worker.

pub mod engine;
mod error;
mod executor;
mod gate;
mod worker;

pub use engine::{EngineError, EngineHandle, RenderEngine, RenderSession};
pub use error::RenderError;
pub use executor::{PoolConfig, RenderExecutor};
pub use gate::{GateConfig, GatePermit, PoolStats, ResourceGate};
pub use worker::WorkerManager;
