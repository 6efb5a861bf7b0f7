//! Designer templates stored as one JSON document per template.

use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::templates::{NewTemplate, StoredTemplate, TemplatePatch, TemplateSummary};

use super::StorageError;

const SOURCE: &str = "infra::storage::templates";
const ID_LEN: usize = 8;

#[derive(Debug)]
pub struct TemplateStore {
    root: PathBuf,
    // Serialises read-modify-write cycles on individual records.
    writes: Mutex<()>,
}

impl TemplateStore {
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        info!(
            target = SOURCE,
            op = "init",
            root = %root.display(),
            "Template store ready"
        );
        Ok(Self {
            root,
            writes: Mutex::new(()),
        })
    }

    /// Summaries of every stored template, ordered by name. Unreadable records
    /// are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<TemplateSummary>, StorageError> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path).await {
                Ok(template) => summaries.push(template.summary()),
                Err(err) => warn!(
                    target = SOURCE,
                    op = "list",
                    path = %path.display(),
                    error = %err,
                    "Skipping unreadable template"
                ),
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    pub async fn get(&self, id: &str) -> Result<StoredTemplate, StorageError> {
        let path = self.record_path(id).ok_or_else(|| StorageError::not_found(id))?;
        match read_record(&path).await {
            Err(StorageError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(id))
            }
            other => other,
        }
    }

    pub async fn create(&self, new: NewTemplate) -> Result<StoredTemplate, StorageError> {
        let _guard = self.writes.lock().await;
        let id = self.fresh_id().await;
        let now = OffsetDateTime::now_utc();
        let template = StoredTemplate {
            id,
            name: new.name,
            project_data: new.project_data,
            html: new.html,
            css: new.css,
            created_at: now,
            updated_at: now,
        };
        self.write_record(&template).await?;
        info!(
            target = SOURCE,
            op = "create",
            id = %template.id,
            name = %template.name,
            "Created template"
        );
        Ok(template)
    }

    pub async fn update(
        &self,
        id: &str,
        patch: TemplatePatch,
    ) -> Result<StoredTemplate, StorageError> {
        let _guard = self.writes.lock().await;
        let mut template = self.get(id).await?;
        template.apply(patch, OffsetDateTime::now_utc());
        self.write_record(&template).await?;
        info!(
            target = SOURCE,
            op = "update",
            id = %template.id,
            name = %template.name,
            "Updated template"
        );
        Ok(template)
    }

    /// Remove a template. Missing templates are treated as success.
    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let Some(path) = self.record_path(id) else {
            return Ok(());
        };
        let _guard = self.writes.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(target = SOURCE, op = "delete", id, "Deleted template");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    fn record_path(&self, id: &str) -> Option<PathBuf> {
        let safe = sanitize_id(id);
        if safe.is_empty() {
            return None;
        }
        Some(self.root.join(format!("{safe}.json")))
    }

    async fn fresh_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string()[..ID_LEN].to_string();
            let taken = fs::try_exists(self.root.join(format!("{id}.json")))
                .await
                .unwrap_or(false);
            if !taken {
                return id;
            }
        }
    }

    async fn write_record(&self, template: &StoredTemplate) -> Result<(), StorageError> {
        let path = self.root.join(format!("{}.json", template.id));
        let staging = self.root.join(format!(".{}.json.tmp", template.id));
        let body = serde_json::to_vec_pretty(template).map_err(StorageError::Encode)?;
        fs::write(&staging, body).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
        .collect()
}

async fn read_record(path: &Path) -> Result<StoredTemplate, StorageError> {
    let bytes = fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
