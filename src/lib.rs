//! HTML-to-PDF rendering service built around a bounded, crash-tolerant pool
//! of headless Chromium sessions.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

pub mod util {
    pub mod bytes;
    pub(crate) mod lock;
}
