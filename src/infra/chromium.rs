//! Headless Chromium driven over the DevTools protocol.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::render::{EngineError, EngineHandle, RenderEngine, RenderSession};
use crate::config::EngineSettings;
use crate::domain::options::PdfOptions;

const SOURCE: &str = "infra::chromium";

/// Flags every worker starts with. Sandboxing is off because the service runs
/// inside containers without user namespaces.
const BASELINE_ARGS: [&str; 4] = [
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--font-render-hinting=none",
];

#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    settings: EngineSettings,
}

impl ChromiumEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self, profile_dir: &Path) -> Result<BrowserConfig, EngineError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .user_data_dir(profile_dir)
            .launch_timeout(self.settings.launch_timeout)
            .args(BASELINE_ARGS)
            .args(self.settings.extra_args.iter().map(String::as_str));

        if let Some(path) = self.settings.chrome_executable.as_ref() {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(EngineError::launch)
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn launch(&self) -> Result<Arc<dyn EngineHandle>, EngineError> {
        let profile_dir = std::env::temp_dir().join(format!("pdfsmith-chrome-{}", Uuid::new_v4()));
        let config = self.browser_config(&profile_dir)?;

        let launched = tokio::time::timeout(
            self.settings.launch_timeout + Duration::from_secs(1),
            Browser::launch(config),
        )
        .await
        .map_err(|_| {
            EngineError::launch(format!(
                "browser did not start within {:?}",
                self.settings.launch_timeout
            ))
        })?;
        let (browser, mut handler) =
            launched.map_err(|err| EngineError::launch(err.to_string()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let handler_flag = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(
                        target = SOURCE,
                        op = "handler",
                        error = %err,
                        "DevTools event error"
                    );
                }
            }
            handler_flag.store(false, Ordering::SeqCst);
            warn!(
                target = SOURCE,
                op = "handler",
                "DevTools connection closed; worker marked disconnected"
            );
        });

        info!(
            target = SOURCE,
            op = "launch",
            profile_dir = %profile_dir.display(),
            "Chromium started"
        );

        Ok(Arc::new(ChromiumHandle {
            browser: RwLock::new(Some(browser)),
            connected,
            profile_dir,
        }))
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

struct ChromiumHandle {
    browser: RwLock<Option<Browser>>,
    connected: Arc<AtomicBool>,
    profile_dir: PathBuf,
}

#[async_trait]
impl EngineHandle for ChromiumHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_session(&self) -> Result<Box<dyn RenderSession>, EngineError> {
        let guard = self.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| EngineError::Disconnected("browser already closed".into()))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| EngineError::session(format!("failed to open page: {err}")))?;
        Ok(Box::new(ChromiumSession { page }))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.connected.store(false, Ordering::SeqCst);
        let Some(mut browser) = self.browser.write().await.take() else {
            return Ok(());
        };

        let closed = browser.close().await.map(drop);
        if let Err(err) = browser.wait().await {
            warn!(
                target = SOURCE,
                op = "close",
                error = %err,
                "Failed waiting for Chromium to exit"
            );
        }
        if let Err(err) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            debug!(
                target = SOURCE,
                op = "close",
                profile_dir = %self.profile_dir.display(),
                error = %err,
                "Could not remove browser profile directory"
            );
        }

        closed.map_err(|err| EngineError::Disconnected(err.to_string()))
    }
}

struct ChromiumSession {
    page: Page,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn load_content(&mut self, html: &str) -> Result<(), EngineError> {
        self.page
            .set_content(html)
            .await
            .map(drop)
            .map_err(|err| EngineError::session(format!("failed to load content: {err}")))
    }

    async fn print_pdf(&mut self, options: &PdfOptions) -> Result<Vec<u8>, EngineError> {
        let params = print_params(options)?;
        self.page
            .pdf(params)
            .await
            .map_err(|err| EngineError::session(format!("failed to print PDF: {err}")))
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.page
            .close()
            .await
            .map_err(|err| EngineError::session(format!("failed to close page: {err}")))
    }
}

fn print_params(options: &PdfOptions) -> Result<PrintToPdfParams, EngineError> {
    let (top, right, bottom, left) = options
        .margin
        .to_inches()
        .map_err(|err| EngineError::session(err.to_string()))?;
    let (width, height) = options.format.size_inches();

    Ok(PrintToPdfParams {
        landscape: Some(options.landscape),
        display_header_footer: Some(options.display_header_footer),
        print_background: Some(options.print_background),
        scale: options.scale,
        paper_width: Some(width),
        paper_height: Some(height),
        margin_top: Some(top),
        margin_bottom: Some(bottom),
        margin_left: Some(left),
        margin_right: Some(right),
        header_template: Some(options.header_template().to_string()),
        footer_template: Some(options.footer_template().to_string()),
        prefer_css_page_size: Some(options.prefer_css_page_size),
        ..PrintToPdfParams::default()
    })
}
