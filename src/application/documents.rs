//! Turning templates and data into finished documents.
//!
//! Every path ends in a self-contained HTML string (data merged, assets and
//! fonts inlined) handed to the render pool.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::application::render::{RenderError, RenderExecutor};
use crate::application::templates::{TemplateError, TemplateRenderer, qr_code_data_uri};
use crate::domain::options::PdfOptions;
use crate::domain::templates::StoredTemplate;
use crate::infra::assets::AssetInliner;
use crate::infra::storage::{StorageError, TemplateStore};

const SOURCE: &str = "application::documents";
/// Context key under which named templates receive the embedded font rules.
const FONT_CSS_KEY: &str = "fontCss";
/// Text to encode; the resulting image URI is added as `qrCodeDataUri`.
const QR_CONTENT_KEY: &str = "qrCodeContent";
const QR_URI_KEY: &str = "qrCodeDataUri";
const FIXTURE_SUFFIX: &str = ".fixture.json";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid document request: {0}")]
    Invalid(String),
    #[error("cannot load fixture {path}: {message}")]
    Fixture { path: PathBuf, message: String },
}

/// Where the markup for a document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// A `.hbs` template from the templates directory.
    Template(String),
    /// Caller-supplied markup, merged as a Handlebars template.
    Html(String),
}

impl DocumentSource {
    /// Pick the source from an API body carrying `template` and/or `html`.
    /// A named template wins when both are present.
    pub fn from_parts(template: Option<String>, html: Option<String>) -> Result<Self, DocumentError> {
        let template = template.filter(|name| !name.trim().is_empty());
        let html = html.filter(|markup| !markup.trim().is_empty());
        match (template, html) {
            (Some(name), _) => Ok(Self::Template(name)),
            (None, Some(markup)) => Ok(Self::Html(markup)),
            (None, None) => Err(DocumentError::Invalid(
                "either `template` or `html` must be provided".to_string(),
            )),
        }
    }

    /// Label used for saved file names and download headers.
    pub fn label(&self) -> &str {
        match self {
            Self::Template(name) => name,
            Self::Html(_) => "document",
        }
    }
}

#[derive(Clone)]
pub struct DocumentService {
    executor: RenderExecutor,
    templates: Arc<TemplateRenderer>,
    assets: Arc<AssetInliner>,
    store: Arc<TemplateStore>,
}

impl DocumentService {
    pub fn new(
        executor: RenderExecutor,
        templates: Arc<TemplateRenderer>,
        assets: Arc<AssetInliner>,
        store: Arc<TemplateStore>,
    ) -> Self {
        Self {
            executor,
            templates,
            assets,
            store,
        }
    }

    pub fn executor(&self) -> &RenderExecutor {
        &self.executor
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Merged, asset-inlined HTML without touching the render pool.
    pub async fn render_html(
        &self,
        source: &DocumentSource,
        data: &Value,
    ) -> Result<String, DocumentError> {
        let merged = match source {
            DocumentSource::Template(name) => {
                self.templates.render(name, &self.template_context(data)?)?
            }
            DocumentSource::Html(markup) => self.templates.render_inline(markup, data)?,
        };
        Ok(self.assets.inline_asset_urls(&merged).await)
    }

    pub async fn render_pdf(
        &self,
        source: &DocumentSource,
        data: &Value,
        options: &PdfOptions,
    ) -> Result<Vec<u8>, DocumentError> {
        // Reject bad options before spending time on the merge.
        options
            .validate()
            .map_err(|err| RenderError::InvalidOptions {
                message: err.to_string(),
            })?;
        let html = self.render_html(source, data).await?;
        let pdf = self.executor.render(&html, options).await?;
        info!(
            target = SOURCE,
            op = "render_pdf",
            source = source.label(),
            bytes = pdf.len(),
            "Document rendered"
        );
        Ok(pdf)
    }

    /// A named template merged with its sample data from
    /// `{fixtures_dir}/{name}.fixture.json`. Without a fixture file the
    /// template renders with empty data.
    pub async fn fixture_preview(
        &self,
        name: &str,
        fixtures_dir: &Path,
    ) -> Result<String, DocumentError> {
        // Only registered names are turned into paths.
        if !self.templates.contains(name) {
            return Err(TemplateError::NotFound {
                name: name.to_string(),
            }
            .into());
        }

        let path = fixtures_dir.join(format!("{name}{FIXTURE_SUFFIX}"));
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|err| DocumentError::Fixture {
                    path: path.clone(),
                    message: err.to_string(),
                })?
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Value::Null,
            Err(err) => {
                return Err(DocumentError::Fixture {
                    path,
                    message: err.to_string(),
                });
            }
        };
        self.render_html(&DocumentSource::Template(name.to_string()), &data)
            .await
    }

    /// Render a stored designer template with `data`.
    pub async fn render_stored(
        &self,
        id: &str,
        data: &Value,
    ) -> Result<(StoredTemplate, Vec<u8>), DocumentError> {
        let template = self.store.get(id).await?;
        let pdf = self.render_designer(&template.html, &template.css, data).await?;
        Ok((template, pdf))
    }

    /// Render unsaved designer markup, as the editor's preview does.
    pub async fn preview(
        &self,
        html: &str,
        css: &str,
        data: &Value,
    ) -> Result<Vec<u8>, DocumentError> {
        self.render_designer(html, css, data).await
    }

    async fn render_designer(
        &self,
        html: &str,
        css: &str,
        data: &Value,
    ) -> Result<Vec<u8>, DocumentError> {
        // Designer exports often carry stray braces; merge failures fall back
        // to the markup as authored.
        let merged = match self.templates.render_inline(html, data) {
            Ok(merged) => merged,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "render_designer",
                    error = %err,
                    "Template merge failed; rendering raw markup"
                );
                html.to_string()
            }
        };
        let body = self.assets.inline_asset_urls(&merged).await;
        let document = designer_shell(self.assets.font_css(), css, &body);
        Ok(self
            .executor
            .render(&document, &PdfOptions::css_driven())
            .await?)
    }

    fn template_context(&self, data: &Value) -> Result<Value, TemplateError> {
        let mut context = match data {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other.clone());
                map
            }
        };
        context
            .entry(FONT_CSS_KEY)
            .or_insert_with(|| Value::String(self.assets.font_css().to_string()));

        let qr_content = match context.get(QR_CONTENT_KEY) {
            Some(Value::String(content))
                if !content.is_empty() && !context.contains_key(QR_URI_KEY) =>
            {
                Some(content.clone())
            }
            _ => None,
        };
        if let Some(content) = qr_content {
            context.insert(
                QR_URI_KEY.to_string(),
                Value::String(qr_code_data_uri(&content)?),
            );
        }
        Ok(Value::Object(context))
    }
}

fn designer_shell(font_css: &str, css: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <style>
{font_css}
{css}
* {{ -webkit-print-color-adjust: exact !important; print-color-adjust: exact !important; }}
@page {{ size: A4; margin: 0; }}
  </style>
</head>
<body>{body}</body>
</html>"#
    )
}
