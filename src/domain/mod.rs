//! Domain types shared across layers.

pub mod error;
pub mod options;
pub mod templates;
