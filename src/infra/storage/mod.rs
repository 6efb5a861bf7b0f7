//! Filesystem persistence for generated documents and designer templates.

pub mod files;
pub mod templates;

use std::path::PathBuf;

use thiserror::Error;

pub use files::{FileStorage, SavedFile};
pub use templates::TemplateStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("`{name}` not found")]
    NotFound { name: String },
    #[error("stored record `{path}` is corrupt")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }
}
