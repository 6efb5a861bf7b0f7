use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the pdfsmith binary.
#[derive(Debug, Parser)]
#[command(name = "pdfsmith", version, about = "HTML to PDF rendering service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PDFSMITH_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP rendering service.
    Serve(Box<ServeArgs>),
    /// Render one document to a PDF file and exit.
    Render(Box<RenderArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

/// Settings shared by every command that drives the render pool.
#[derive(Debug, Args, Default, Clone)]
pub struct PoolOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the number of renders allowed to run at once.
    #[arg(long = "max-concurrent", value_name = "COUNT")]
    pub max_concurrent: Option<u64>,

    /// Override how many renders may wait for a slot.
    #[arg(long = "max-queue", value_name = "COUNT")]
    pub max_queue: Option<u64>,

    /// Override how long a queued render waits for a slot.
    #[arg(long = "queue-timeout-ms", value_name = "MILLISECONDS")]
    pub queue_timeout_ms: Option<u64>,

    /// Override the hard deadline for a single render.
    #[arg(long = "render-timeout-ms", value_name = "MILLISECONDS")]
    pub render_timeout_ms: Option<u64>,

    /// Override the Chromium executable used for rendering.
    #[arg(long = "chrome-path", value_name = "PATH", value_hint = ValueHint::ExecutablePath)]
    pub chrome_path: Option<PathBuf>,

    /// Override the directory holding Handlebars templates.
    #[arg(long = "templates-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub templates_dir: Option<PathBuf>,

    /// Override the directory served as `/assets/` to templates.
    #[arg(long = "assets-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub assets_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub pool: PoolOverrides,

    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "graceful-shutdown-seconds", value_name = "SECONDS")]
    pub graceful_shutdown_seconds: Option<u64>,

    /// Override the directory generated PDFs are saved to.
    #[arg(long = "output-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    /// Override the directory stored designer templates live in.
    #[arg(long = "template-store-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub template_store_dir: Option<PathBuf>,

    /// API key required on `/pdf` and `/api` routes.
    #[arg(long = "api-key", env = "PDF_API_KEY", value_name = "KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the rate limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the rate limit request ceiling.
    #[arg(long = "rate-limit-max-requests", value_name = "COUNT")]
    pub rate_limit_max_requests: Option<u64>,

    /// Rate limit on the first `X-Forwarded-For` hop. Enable only behind a
    /// reverse proxy that sets the header.
    #[arg(long = "trust-forwarded-for")]
    pub trust_forwarded_for: bool,

    /// Comma-separated origins allowed to make credentialed CORS requests.
    #[arg(long = "cors-origins", value_name = "ORIGINS")]
    pub cors_origins: Option<String>,
}

#[derive(Debug, Args, Clone)]
#[command(group(ArgGroup::new("source").required(true).args(["html", "template"])))]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: PoolOverrides,

    /// HTML file to render.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub html: Option<PathBuf>,

    /// Name of a Handlebars template in the templates directory.
    #[arg(long, value_name = "NAME")]
    pub template: Option<String>,

    /// JSON file merged into the document.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub data: Option<PathBuf>,

    /// JSON file with print options (format, margin, ...).
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub options: Option<PathBuf>,

    /// Destination of the rendered PDF.
    #[arg(long, short = 'o', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
}
