//! Generated PDFs kept on disk for later download.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics::counter;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::util::bytes::ByteSize;

use super::StorageError;

const SOURCE: &str = "infra::storage::files";
const PDF_EXTENSION: &str = "pdf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Output directory for saved documents, with age-based expiry.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    max_age: Duration,
}

impl FileStorage {
    /// Open storage rooted at `root`, creating the directory if necessary.
    pub fn new(root: PathBuf, max_age: Duration) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, max_age })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` as `{label}-{short id}-{unix millis}.pdf`.
    pub async fn save(&self, bytes: &[u8], label: &str) -> Result<SavedFile, StorageError> {
        let short_id = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "{}-{}-{}.{PDF_EXTENSION}",
            sanitize_label(label),
            &short_id[..8],
            unix_millis(SystemTime::now())
        );
        let path = self.root.join(&file_name);
        fs::write(&path, bytes).await?;

        let size = bytes.len() as u64;
        info!(
            target = SOURCE,
            op = "save",
            file_name = %file_name,
            size = %ByteSize(size),
            "Saved document"
        );

        Ok(SavedFile {
            file_name,
            path,
            size,
        })
    }

    /// Locate a saved file by name. Only the final path component is honoured,
    /// so callers can never reach outside the output directory.
    pub async fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let base = Path::new(file_name).file_name()?;
        let path = self.root.join(base);
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Some(path),
            _ => None,
        }
    }

    /// Delete saved PDFs whose modification time is older than the configured
    /// maximum age. Returns the number of files removed.
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = SystemTime::now();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut purged = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PDF_EXTENSION) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        op = "purge",
                        path = %path.display(),
                        error = %err,
                        "Skipping file without modification time"
                    );
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= self.max_age {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => purged += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    target = SOURCE,
                    op = "purge",
                    path = %path.display(),
                    error = %err,
                    "Failed to remove expired file"
                ),
            }
        }

        if purged > 0 {
            counter!("pdfsmith_files_purged_total").increment(purged as u64);
            info!(target = SOURCE, op = "purge", purged, "Purged expired documents");
        }
        Ok(purged)
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` until the
    /// returned handle is aborted.
    pub fn spawn_purge_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.purge_expired().await {
                    warn!(
                        target = SOURCE,
                        op = "purge",
                        error = %err,
                        "Purge pass failed"
                    );
                }
            }
        })
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` so the label is safe in file names
/// and `Content-Disposition` headers.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

fn unix_millis(at: SystemTime) -> u128 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn backdate(path: &Path, by: Duration) {
        let file = std::fs::File::options()
            .write(true)
            .open(path)
            .expect("open for backdating");
        file.set_modified(SystemTime::now() - by)
            .expect("set mtime");
    }

    #[tokio::test]
    async fn save_names_files_by_label_id_and_time() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(dir.path().join("out"), DAY).expect("storage");

        let saved = storage.save(b"%PDF-1.7", "service order/2024").await.expect("save");

        let parts: Vec<&str> = saved
            .file_name
            .trim_end_matches(".pdf")
            .rsplitn(3, '-')
            .collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], "service_order_2024");
        assert_eq!(parts[1].len(), 8);
        assert!(parts[0].parse::<u128>().is_ok());
        assert_eq!(saved.size, 8);
        assert_eq!(std::fs::read(&saved.path).expect("read back"), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn resolve_only_accepts_basenames_inside_root() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("secret.pdf"), b"x").expect("outside file");
        let storage = FileStorage::new(dir.path().join("out"), DAY).expect("storage");
        let saved = storage.save(b"pdf", "doc").await.expect("save");

        assert_eq!(
            storage.resolve(&saved.file_name).await,
            Some(saved.path.clone())
        );
        assert_eq!(
            storage
                .resolve(&format!("../../{}", saved.file_name))
                .await,
            Some(saved.path)
        );
        assert!(storage.resolve("../secret.pdf").await.is_none());
        assert!(storage.resolve("missing.pdf").await.is_none());
        assert!(storage.resolve("..").await.is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_expired_pdfs() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FileStorage::new(dir.path().to_path_buf(), DAY).expect("storage");

        let fresh = storage.save(b"new", "fresh").await.expect("fresh");
        let stale = storage.save(b"old", "stale").await.expect("stale");
        backdate(&stale.path, DAY * 2);
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, b"keep").expect("notes");
        backdate(&notes, DAY * 2);

        let purged = storage.purge_expired().await.expect("purge");

        assert_eq!(purged, 1);
        assert!(fresh.path.exists());
        assert!(!stale.path.exists());
        assert!(notes.exists());
    }

    #[test]
    fn labels_are_sanitised() {
        assert_eq!(sanitize_label("borrowing-slip"), "borrowing-slip");
        assert_eq!(sanitize_label("slip v2/final"), "slip_v2_final");
        assert_eq!(sanitize_label(""), "document");
    }
}
