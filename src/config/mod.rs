//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::render::{GateConfig, PoolConfig};

mod cli;

pub use cli::{CliArgs, Command, PoolOverrides, RenderArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pdfsmith";
const ENV_PREFIX: &str = "PDFSMITH";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
pub(crate) const DEFAULT_MAX_CONCURRENT: u64 = 5;
pub(crate) const DEFAULT_MAX_QUEUE: u64 = 20;
pub(crate) const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 60_000;
pub(crate) const DEFAULT_RENDER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_LAUNCH_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_TEMPLATE_STORE_DIR: &str = "data/templates";
const DEFAULT_FILE_MAX_AGE_SECS: u64 = 24 * 60 * 60;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_TEMPLATES_DIR: &str = "templates";
const DEFAULT_FIXTURES_DIR: &str = "test/fixtures";
const DEFAULT_ASSETS_DIR: &str = "assets";
const DEFAULT_FONT_FAMILY: &str = "Bai Jamjuree";
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 30;

/// Unprefixed environment names accepted for the pool knobs, mapped to their
/// configuration keys.
const FLAT_ENV_KEYS: [(&str, &str); 5] = [
    ("MAX_CONCURRENT_WORKERS", "pool.max_concurrent"),
    ("MAX_QUEUE_LENGTH", "pool.max_queue"),
    ("QUEUE_TIMEOUT_MS", "pool.queue_timeout_ms"),
    ("RENDER_TIMEOUT_MS", "pool.render_timeout_ms"),
    ("CORS_ORIGINS", "security.cors_origins"),
];

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub pool: PoolSettings,
    pub engine: EngineSettings,
    pub storage: StorageSettings,
    pub templates: TemplateSettings,
    pub assets: AssetSettings,
    pub security: SecuritySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_concurrent: NonZeroU32,
    pub max_queue: u32,
    pub queue_timeout: Duration,
    pub render_timeout: Duration,
}

impl PoolSettings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            gate: GateConfig {
                capacity: self.max_concurrent.get() as usize,
                max_queue: self.max_queue as usize,
                queue_timeout: self.queue_timeout,
            },
            render_timeout: self.render_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chrome_executable: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub launch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub output_dir: PathBuf,
    pub template_store_dir: PathBuf,
    pub max_file_age: Duration,
    pub purge_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub directory: PathBuf,
    /// Sample data for `GET /pdf/preview/{template}`, one
    /// `{template}.fixture.json` per template.
    pub fixtures_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AssetSettings {
    pub directory: PathBuf,
    pub fonts_dir: Option<PathBuf>,
    pub font_family: String,
}

#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub api_key: Option<String>,
    pub rate_limit_window_seconds: NonZeroU32,
    pub rate_limit_max_requests: NonZeroU32,
    /// Key rate limits on the first `X-Forwarded-For` hop instead of the
    /// socket peer. Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    /// Browser origins allowed to call the API with credentials. Empty means
    /// any origin, without credentials.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("engine.extra_args")
            .try_parsing(true),
    );
    builder = apply_flat_env(builder, |name| std::env::var(name).ok())?;

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_pool_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

fn apply_flat_env(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigBuilder<DefaultState>, LoadError> {
    for (name, key) in FLAT_ENV_KEYS {
        let value = lookup(name).filter(|value| !value.trim().is_empty());
        builder = builder.set_override_option(key, value)?;
    }
    Ok(builder)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    pool: RawPoolSettings,
    engine: RawEngineSettings,
    storage: RawStorageSettings,
    templates: RawTemplateSettings,
    assets: RawAssetSettings,
    security: RawSecuritySettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(dir) = overrides.output_dir.as_ref() {
            self.storage.output_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.template_store_dir.as_ref() {
            self.storage.template_store_dir = Some(dir.clone());
        }
        if let Some(key) = overrides.api_key.as_ref() {
            self.security.api_key = Some(key.clone());
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.security.rate_limit_window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_max_requests {
            self.security.rate_limit_max_requests = Some(max);
        }
        if overrides.trust_forwarded_for {
            self.security.trust_forwarded_for = Some(true);
        }
        if let Some(origins) = overrides.cors_origins.as_ref() {
            self.security.cors_origins = Some(origins.clone());
        }

        self.apply_pool_overrides(&overrides.pool);
    }

    fn apply_pool_overrides(&mut self, overrides: &PoolOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(value) = overrides.max_concurrent {
            self.pool.max_concurrent = Some(value);
        }
        if let Some(value) = overrides.max_queue {
            self.pool.max_queue = Some(value);
        }
        if let Some(value) = overrides.queue_timeout_ms {
            self.pool.queue_timeout_ms = Some(value);
        }
        if let Some(value) = overrides.render_timeout_ms {
            self.pool.render_timeout_ms = Some(value);
        }
        if let Some(path) = overrides.chrome_path.as_ref() {
            self.engine.chrome_executable = Some(path.clone());
        }
        if let Some(dir) = overrides.templates_dir.as_ref() {
            self.templates.directory = Some(dir.clone());
        }
        if let Some(dir) = overrides.assets_dir.as_ref() {
            self.assets.directory = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            pool,
            engine,
            storage,
            templates,
            assets,
            security,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            pool: build_pool_settings(pool)?,
            engine: build_engine_settings(engine)?,
            storage: build_storage_settings(storage)?,
            templates: build_template_settings(templates)?,
            assets: build_asset_settings(assets)?,
            security: build_security_settings(security)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_pool_settings(pool: RawPoolSettings) -> Result<PoolSettings, LoadError> {
    let max_concurrent = non_zero_u32(
        pool.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT),
        "pool.max_concurrent",
    )?;

    let max_queue: u32 = pool
        .max_queue
        .unwrap_or(DEFAULT_MAX_QUEUE)
        .try_into()
        .map_err(|_| LoadError::invalid("pool.max_queue", "value exceeds supported range for u32"))?;

    let queue_timeout = positive_millis(
        pool.queue_timeout_ms.unwrap_or(DEFAULT_QUEUE_TIMEOUT_MS),
        "pool.queue_timeout_ms",
    )?;
    let render_timeout = positive_millis(
        pool.render_timeout_ms.unwrap_or(DEFAULT_RENDER_TIMEOUT_MS),
        "pool.render_timeout_ms",
    )?;

    Ok(PoolSettings {
        max_concurrent,
        max_queue,
        queue_timeout,
        render_timeout,
    })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let chrome_executable = engine
        .chrome_executable
        .filter(|path| !path.as_os_str().is_empty());

    let extra_args = engine
        .extra_args
        .unwrap_or_default()
        .into_iter()
        .map(|arg| arg.trim().to_string())
        .filter(|arg| !arg.is_empty())
        .collect::<Vec<_>>();
    if let Some(bad) = extra_args.iter().find(|arg| !arg.starts_with("--")) {
        return Err(LoadError::invalid(
            "engine.extra_args",
            format!("`{bad}` is not a `--flag` style argument"),
        ));
    }

    let launch_timeout = positive_millis(
        engine.launch_timeout_ms.unwrap_or(DEFAULT_LAUNCH_TIMEOUT_MS),
        "engine.launch_timeout_ms",
    )?;

    Ok(EngineSettings {
        chrome_executable,
        extra_args,
        launch_timeout,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let output_dir = non_empty_path(
        storage.output_dir,
        DEFAULT_OUTPUT_DIR,
        "storage.output_dir",
    )?;
    let template_store_dir = non_empty_path(
        storage.template_store_dir,
        DEFAULT_TEMPLATE_STORE_DIR,
        "storage.template_store_dir",
    )?;

    let max_age_secs = storage
        .max_file_age_seconds
        .unwrap_or(DEFAULT_FILE_MAX_AGE_SECS);
    if max_age_secs == 0 {
        return Err(LoadError::invalid(
            "storage.max_file_age_seconds",
            "must be greater than zero",
        ));
    }

    let purge_secs = storage
        .purge_interval_seconds
        .unwrap_or(DEFAULT_PURGE_INTERVAL_SECS);
    if purge_secs == 0 {
        return Err(LoadError::invalid(
            "storage.purge_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(StorageSettings {
        output_dir,
        template_store_dir,
        max_file_age: Duration::from_secs(max_age_secs),
        purge_interval: Duration::from_secs(purge_secs),
    })
}

fn build_template_settings(templates: RawTemplateSettings) -> Result<TemplateSettings, LoadError> {
    Ok(TemplateSettings {
        directory: non_empty_path(
            templates.directory,
            DEFAULT_TEMPLATES_DIR,
            "templates.directory",
        )?,
        fixtures_dir: non_empty_path(
            templates.fixtures_dir,
            DEFAULT_FIXTURES_DIR,
            "templates.fixtures_dir",
        )?,
    })
}

fn build_asset_settings(assets: RawAssetSettings) -> Result<AssetSettings, LoadError> {
    let directory = non_empty_path(assets.directory, DEFAULT_ASSETS_DIR, "assets.directory")?;
    let fonts_dir = assets
        .fonts_dir
        .filter(|path| !path.as_os_str().is_empty());
    let font_family = assets
        .font_family
        .map(|family| family.trim().to_string())
        .filter(|family| !family.is_empty())
        .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string());
    if font_family.contains(['\'', '"', ';', '{', '}']) {
        return Err(LoadError::invalid(
            "assets.font_family",
            "must not contain quotes, braces or semicolons",
        ));
    }

    Ok(AssetSettings {
        directory,
        fonts_dir,
        font_family,
    })
}

fn build_security_settings(security: RawSecuritySettings) -> Result<SecuritySettings, LoadError> {
    let api_key = security.api_key.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let rate_limit_window_seconds = non_zero_u32(
        security
            .rate_limit_window_seconds
            .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS),
        "security.rate_limit_window_seconds",
    )?;
    let rate_limit_max_requests = non_zero_u32(
        security
            .rate_limit_max_requests
            .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS),
        "security.rate_limit_max_requests",
    )?;

    let cors_origins = match security.cors_origins.as_deref() {
        Some(raw) => parse_cors_origins(raw)?,
        None => Vec::new(),
    };

    Ok(SecuritySettings {
        api_key,
        rate_limit_window_seconds,
        rate_limit_max_requests,
        trust_forwarded_for: security.trust_forwarded_for.unwrap_or(false),
        cors_origins,
    })
}

/// Split a comma-separated origin list. Each entry must be a bare
/// `scheme://host[:port]` origin, as browsers send it.
fn parse_cors_origins(raw: &str) -> Result<Vec<String>, LoadError> {
    let mut origins = Vec::new();
    for origin in raw.split(',').map(str::trim).filter(|origin| !origin.is_empty()) {
        let origin = origin.trim_end_matches('/');
        let host = origin
            .strip_prefix("https://")
            .or_else(|| origin.strip_prefix("http://"));
        let valid = host.is_some_and(|host| {
            !host.is_empty()
                && !host.contains('/')
                && host.chars().all(|ch| ch.is_ascii_graphic())
        });
        if !valid {
            return Err(LoadError::invalid(
                "security.cors_origins",
                format!("`{origin}` is not an http(s) origin"),
            ));
        }
        origins.push(origin.to_string());
    }
    Ok(origins)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPoolSettings {
    max_concurrent: Option<u64>,
    max_queue: Option<u64>,
    queue_timeout_ms: Option<u64>,
    render_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    chrome_executable: Option<PathBuf>,
    extra_args: Option<Vec<String>>,
    launch_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    output_dir: Option<PathBuf>,
    template_store_dir: Option<PathBuf>,
    max_file_age_seconds: Option<u64>,
    purge_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    directory: Option<PathBuf>,
    fixtures_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAssetSettings {
    directory: Option<PathBuf>,
    fonts_dir: Option<PathBuf>,
    font_family: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSecuritySettings {
    api_key: Option<String>,
    rate_limit_window_seconds: Option<u64>,
    rate_limit_max_requests: Option<u64>,
    trust_forwarded_for: Option<bool>,
    cors_origins: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

#[cfg(test)]
mod tests;
