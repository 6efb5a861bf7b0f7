#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use pdfsmith::application::documents::DocumentService;
use pdfsmith::application::render::{
    EngineError, EngineHandle, GateConfig, PoolConfig, RenderEngine, RenderExecutor,
    RenderSession,
};
use pdfsmith::application::templates::TemplateRenderer;
use pdfsmith::config::AssetSettings;
use pdfsmith::domain::options::PdfOptions;
use pdfsmith::infra::assets::AssetInliner;
use pdfsmith::infra::http::{ApiRateLimiter, HttpState};
use pdfsmith::infra::storage::{FileStorage, TemplateStore};

pub const FAKE_PDF: &[u8] = b"%PDF-1.7 fake";

/// In-process engine. When `hold` is set every print waits for a permit, so a
/// test can keep slots busy for as long as it needs.
#[derive(Clone, Default)]
pub struct FakeEngine {
    pub hold: Option<Arc<Semaphore>>,
    pub prints: Arc<AtomicUsize>,
}

struct FakeHandle {
    engine: FakeEngine,
}

struct FakeSession {
    engine: FakeEngine,
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn launch(&self) -> Result<Arc<dyn EngineHandle>, EngineError> {
        Ok(Arc::new(FakeHandle {
            engine: self.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[async_trait]
impl EngineHandle for FakeHandle {
    fn is_connected(&self) -> bool {
        true
    }

    async fn open_session(&self) -> Result<Box<dyn RenderSession>, EngineError> {
        Ok(Box::new(FakeSession {
            engine: self.engine.clone(),
        }))
    }

    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[async_trait]
impl RenderSession for FakeSession {
    async fn load_content(&mut self, _html: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn print_pdf(&mut self, _options: &PdfOptions) -> Result<Vec<u8>, EngineError> {
        if let Some(hold) = &self.engine.hold {
            hold.acquire()
                .await
                .map_err(|err| EngineError::session(err.to_string()))?
                .forget();
        }
        self.engine.prints.fetch_add(1, Ordering::SeqCst);
        Ok(FAKE_PDF.to_vec())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub state: HttpState,
}

pub struct AppOptions {
    pub engine: FakeEngine,
    pub capacity: usize,
    pub max_queue: usize,
    pub api_key: Option<&'static str>,
    pub rate_limit: u32,
    pub trust_forwarded_for: bool,
    pub cors_origins: Vec<&'static str>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            engine: FakeEngine::default(),
            capacity: 2,
            max_queue: 4,
            api_key: None,
            rate_limit: 100,
            trust_forwarded_for: false,
            cors_origins: Vec::new(),
        }
    }
}

pub async fn test_app(options: AppOptions) -> TestApp {
    let dir = TempDir::new().expect("tempdir");
    let templates_dir = dir.path().join("templates");
    let assets_dir = dir.path().join("assets");
    std::fs::create_dir_all(&templates_dir).expect("templates dir");
    std::fs::create_dir_all(&assets_dir).expect("assets dir");
    std::fs::write(
        templates_dir.join("invoice.hbs"),
        "<h1>Invoice {{number}}</h1><img src=\"/assets/logo.png\">",
    )
    .expect("invoice template");
    std::fs::write(assets_dir.join("logo.png"), b"\x89PNG").expect("logo");
    let fixtures_dir = dir.path().join("fixtures");
    std::fs::create_dir_all(&fixtures_dir).expect("fixtures dir");
    std::fs::write(
        fixtures_dir.join("invoice.fixture.json"),
        r#"{ "number": "INV-SAMPLE" }"#,
    )
    .expect("invoice fixture");

    let executor = RenderExecutor::new(
        Arc::new(options.engine),
        PoolConfig {
            gate: GateConfig {
                capacity: options.capacity,
                max_queue: options.max_queue,
                queue_timeout: Duration::from_secs(5),
            },
            render_timeout: Duration::from_secs(5),
        },
    );
    let templates = Arc::new(TemplateRenderer::load(&templates_dir).expect("templates"));
    let assets = Arc::new(
        AssetInliner::load(&AssetSettings {
            directory: assets_dir,
            fonts_dir: None,
            font_family: "Bai Jamjuree".to_string(),
        })
        .await
        .expect("assets"),
    );
    let store = Arc::new(TemplateStore::new(dir.path().join("store")).expect("store"));
    let files = Arc::new(
        FileStorage::new(dir.path().join("output"), Duration::from_secs(3600)).expect("files"),
    );

    let state = HttpState {
        documents: DocumentService::new(executor, templates, Arc::clone(&assets), store),
        files,
        assets,
        api_key: options.api_key.map(Arc::<str>::from),
        rate_limiter: Arc::new(ApiRateLimiter::new(
            Duration::from_secs(60),
            options.rate_limit,
        )),
        trust_forwarded_for: options.trust_forwarded_for,
        cors_origins: options
            .cors_origins
            .iter()
            .map(|origin| origin.to_string())
            .collect(),
        fixtures_dir: Arc::from(fixtures_dir.as_path()),
        started_at: Instant::now(),
    };

    TestApp { dir, state }
}
