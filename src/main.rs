use std::{
    net::SocketAddr,
    path::Path,
    process,
    sync::Arc,
    time::{Duration, Instant},
};

use pdfsmith::{
    application::{
        documents::{DocumentService, DocumentSource},
        error::AppError,
        render::RenderExecutor,
        templates::TemplateRenderer,
    },
    config,
    domain::options::PdfOptions,
    infra::{
        assets::AssetInliner,
        chromium::ChromiumEngine,
        error::InfraError,
        http::{self, ApiRateLimiter, HttpState},
        storage::{FileStorage, TemplateStore},
        telemetry,
    },
    util::bytes::ByteSize,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, *args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (documents, assets) = build_documents(&settings).await?;
    let files = Arc::new(FileStorage::new(
        settings.storage.output_dir.clone(),
        settings.storage.max_file_age,
    )?);

    // A failed first launch is retried by the first render.
    if let Err(err) = documents.executor().start().await {
        warn!(
            target = "pdfsmith::serve",
            error = %err,
            "Rendering worker did not start; will retry on first request"
        );
    }

    let purge_handle = Arc::clone(&files).spawn_purge_task(settings.storage.purge_interval);

    let api_key = settings.security.api_key.as_deref().map(Arc::<str>::from);
    if api_key.is_none() {
        warn!(
            target = "pdfsmith::serve",
            "No API key configured; /pdf and /api routes are open"
        );
    }
    let rate_limiter = ApiRateLimiter::new(
        Duration::from_secs(u64::from(settings.security.rate_limit_window_seconds.get())),
        settings.security.rate_limit_max_requests.get(),
    );

    let state = HttpState {
        documents: documents.clone(),
        files,
        assets,
        api_key,
        rate_limiter: Arc::new(rate_limiter),
        trust_forwarded_for: settings.security.trust_forwarded_for,
        cors_origins: settings.security.cors_origins.clone().into(),
        fixtures_dir: Arc::from(settings.templates.fixtures_dir.as_path()),
        started_at: Instant::now(),
    };

    let result = serve_http(&settings, state).await;

    purge_handle.abort();
    let _ = purge_handle.await;
    documents.executor().shutdown().await;

    result
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;
    info!(
        target = "pdfsmith::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let (signal_tx, mut signal_rx) = watch::channel(false);
    let server = async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signal_tx.send(true);
        })
        .await
    };

    let grace = settings.server.graceful_shutdown;
    let drain_deadline = async move {
        if signal_rx.wait_for(|received| *received).await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result
            .map_err(|err| AppError::from(InfraError::server(err.to_string()))),
        _ = drain_deadline => {
            warn!(
                target = "pdfsmith::serve",
                grace_secs = grace.as_secs(),
                "Graceful shutdown window elapsed; dropping in-flight requests"
            );
            Ok(())
        }
    }
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let source = match (args.template, args.html) {
        (Some(name), _) => DocumentSource::Template(name),
        (None, Some(path)) => DocumentSource::Html(
            tokio::fs::read_to_string(&path)
                .await
                .map_err(InfraError::from)?,
        ),
        (None, None) => {
            return Err(AppError::validation(
                "either --html or --template must be provided",
            ));
        }
    };
    let data = match args.data.as_deref() {
        Some(path) => read_json(path).await?,
        None => Value::Null,
    };
    let options: PdfOptions = match args.options.as_deref() {
        Some(path) => serde_json::from_value(read_json(path).await?).map_err(|err| {
            AppError::validation(format!("invalid options in {}: {err}", path.display()))
        })?,
        None => PdfOptions::default(),
    };

    let (documents, _) = build_documents(&settings).await?;
    let result = documents.render_pdf(&source, &data, &options).await;
    documents.executor().shutdown().await;
    let pdf = result?;

    tokio::fs::write(&args.output, &pdf)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "pdfsmith::render",
        output = %args.output.display(),
        size = %ByteSize::from(pdf.len()),
        "Document written"
    );
    Ok(())
}

async fn build_documents(
    settings: &config::Settings,
) -> Result<(DocumentService, Arc<AssetInliner>), AppError> {
    let engine = Arc::new(ChromiumEngine::new(settings.engine.clone()));
    let executor = RenderExecutor::new(engine, settings.pool.pool_config());
    let templates = Arc::new(TemplateRenderer::load(
        settings.templates.directory.clone(),
    )?);
    let assets = Arc::new(AssetInliner::load(&settings.assets).await?);
    let store = Arc::new(TemplateStore::new(
        settings.storage.template_store_dir.clone(),
    )?);

    let documents = DocumentService::new(executor, templates, Arc::clone(&assets), store);
    Ok((documents, assets))
}

async fn read_json(path: &Path) -> Result<Value, AppError> {
    let bytes = tokio::fs::read(path).await.map_err(InfraError::from)?;
    serde_json::from_slice(&bytes)
        .map_err(|err| AppError::validation(format!("invalid JSON in {}: {err}", path.display())))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "pdfsmith::serve", error = %err, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = "pdfsmith::serve", error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "pdfsmith::serve", "Shutdown signal received");
}
