//! Application services: the render pool and the document pipeline around it.

pub mod documents;
pub mod error;
pub mod render;
pub mod templates;
