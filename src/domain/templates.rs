//! Designer templates persisted by the template store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::error::DomainError;

/// A template authored in the visual designer: editor state plus the exported
/// markup and stylesheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub project_data: Value,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub css: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StoredTemplate {
    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Apply the fields present in `patch`, leaving identity and creation time
    /// untouched.
    pub fn apply(&mut self, patch: TemplatePatch, now: OffsetDateTime) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(project_data) = patch.project_data {
            self.project_data = project_data;
        }
        if let Some(html) = patch.html {
            self.html = html;
        }
        if let Some(css) = patch.css {
            self.css = css;
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplate {
    pub name: String,
    #[serde(default)]
    pub project_data: Value,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub css: String,
}

impl NewTemplate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("template name must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub project_data: Option<Value>,
    pub html: Option<String>,
    pub css: Option<String>,
}

impl TemplatePatch {
    pub fn validate(&self) -> Result<(), DomainError> {
        match self.name.as_deref() {
            Some(name) if name.trim().is_empty() => {
                Err(DomainError::validation("template name must not be empty"))
            }
            _ => Ok(()),
        }
    }
}
