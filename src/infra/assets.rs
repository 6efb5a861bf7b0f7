//! Inlining of local assets into self-contained documents.
//!
//! Rendering sessions never touch the filesystem or network, so every
//! `/assets/...` reference and every web font is embedded as a data URI before
//! the markup reaches the pool.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use regex::{Captures, Regex};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::AssetSettings;

use super::error::InfraError;

const SOURCE: &str = "infra::assets";
const ASSET_URL_PATTERN: &str = r#"(src|href)=["']/assets/([^"']+)["']"#;

/// File stem markers mapped to CSS font weights, most specific first.
const WEIGHT_MARKERS: [(&str, u16); 9] = [
    ("extralight", 200),
    ("semibold", 600),
    ("extrabold", 800),
    ("thin", 100),
    ("light", 300),
    ("medium", 500),
    ("bold", 700),
    ("black", 900),
    ("regular", 400),
];

pub struct AssetInliner {
    root: PathBuf,
    pattern: Regex,
    font_css: String,
    cache: DashMap<PathBuf, Arc<str>>,
}

impl AssetInliner {
    /// Prepare the inliner and embed the configured font family.
    pub async fn load(settings: &AssetSettings) -> Result<Self, InfraError> {
        let pattern = Regex::new(ASSET_URL_PATTERN)
            .map_err(|err| InfraError::configuration(format!("asset pattern: {err}")))?;

        let fonts_dir = settings
            .fonts_dir
            .clone()
            .unwrap_or_else(|| settings.directory.join("fonts").join(&settings.font_family));
        let font_css = build_font_css(&fonts_dir, &settings.font_family).await;

        Ok(Self {
            root: settings.directory.clone(),
            pattern,
            font_css,
            cache: DashMap::new(),
        })
    }

    /// `@font-face` rules for the embedded font family; empty when no font
    /// files were found.
    pub fn font_css(&self) -> &str {
        &self.font_css
    }

    /// Replace `src="/assets/..."` and `href="/assets/..."` with data URIs.
    /// References that escape the assets directory or point at missing files
    /// are left untouched.
    pub async fn inline_asset_urls(&self, html: &str) -> String {
        let mut resolved: Vec<(String, Option<Arc<str>>)> = Vec::new();
        for captures in self.pattern.captures_iter(html) {
            let relative = captures[2].to_string();
            if resolved.iter().any(|(seen, _)| *seen == relative) {
                continue;
            }
            let data_uri = self.data_uri(&relative).await;
            resolved.push((relative, data_uri));
        }

        if resolved.iter().all(|(_, uri)| uri.is_none()) {
            return html.to_string();
        }

        self.pattern
            .replace_all(html, |captures: &Captures<'_>| {
                let attribute = &captures[1];
                let data_uri = resolved
                    .iter()
                    .find(|(relative, _)| relative == &captures[2])
                    .and_then(|(_, uri)| uri.as_deref());
                match data_uri {
                    Some(uri) => format!("{attribute}=\"{uri}\""),
                    None => captures[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Raw bytes of a file under the assets directory, for browser previews of
    /// markup that still references `/assets/...`.
    pub async fn read(&self, relative: &str) -> Option<Vec<u8>> {
        let path = resolve_within(&self.root, relative)?;
        fs::read(path).await.ok()
    }

    async fn data_uri(&self, relative: &str) -> Option<Arc<str>> {
        let path = resolve_within(&self.root, relative)?;
        if let Some(cached) = self.cache.get(&path) {
            return Some(Arc::clone(cached.value()));
        }

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(
                    target = SOURCE,
                    op = "inline_asset",
                    asset = relative,
                    error = %err,
                    "Asset not inlined"
                );
                return None;
            }
        };

        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        let uri: Arc<str> = format!("data:{mime};base64,{}", STANDARD.encode(bytes)).into();
        self.cache.insert(path, Arc::clone(&uri));
        Some(uri)
    }
}

/// Join `relative` onto `root`, refusing absolute paths and `..` segments.
fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.split(['?', '#']).next().unwrap_or_default());
    if relative.as_os_str().is_empty()
        || relative.is_absolute()
        || relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        })
    {
        return None;
    }
    Some(root.join(relative))
}

async fn build_font_css(fonts_dir: &Path, family: &str) -> String {
    let mut entries = match fs::read_dir(fonts_dir).await {
        Ok(entries) => entries,
        Err(_) => {
            warn!(
                target = SOURCE,
                op = "font_css",
                fonts_dir = %fonts_dir.display(),
                family,
                "Font directory not found; documents fall back to system fonts"
            );
            return String::new();
        }
    };

    let mut faces = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "font_css",
                    error = %err,
                    "Failed to list font directory"
                );
                break;
            }
        };
        let path = entry.path();
        let Some(format) = font_format(&path) else {
            continue;
        };
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "font_css",
                    font = %path.display(),
                    error = %err,
                    "Skipping unreadable font"
                );
                continue;
            }
        };
        faces.push((
            font_weight(&stem),
            stem.contains("italic"),
            format,
            STANDARD.encode(bytes),
        ));
    }

    faces.sort_by_key(|(weight, italic, _, _)| (*weight, *italic));
    let css = faces
        .iter()
        .map(|(weight, italic, (mime, format), data)| {
            let style = if *italic { "italic" } else { "normal" };
            format!(
                "@font-face {{ font-family: '{family}'; src: url('data:{mime};base64,{data}') format('{format}'); font-weight: {weight}; font-style: {style}; }}"
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    info!(
        target = SOURCE,
        op = "font_css",
        family,
        faces = faces.len(),
        "Embedded document fonts"
    );
    css
}

fn font_format(path: &Path) -> Option<(&'static str, &'static str)> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "ttf" => Some(("font/ttf", "truetype")),
        "otf" => Some(("font/otf", "opentype")),
        "woff" => Some(("font/woff", "woff")),
        "woff2" => Some(("font/woff2", "woff2")),
        _ => None,
    }
}

fn font_weight(stem: &str) -> u16 {
    WEIGHT_MARKERS
        .iter()
        .find(|(marker, _)| stem.contains(marker))
        .map(|(_, weight)| *weight)
        .unwrap_or(400)
}
