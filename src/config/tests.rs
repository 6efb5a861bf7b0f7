use std::collections::HashMap;

use super::*;

#[test]
fn defaults_match_documented_pool_limits() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.pool.max_concurrent.get(), 5);
    assert_eq!(settings.pool.max_queue, 20);
    assert_eq!(settings.pool.queue_timeout, Duration::from_millis(60_000));
    assert_eq!(settings.pool.render_timeout, Duration::from_millis(30_000));
    assert_eq!(settings.server.addr.port(), 3000);
    assert_eq!(settings.security.rate_limit_max_requests.get(), 30);
    assert_eq!(settings.security.rate_limit_window_seconds.get(), 60);
    assert!(settings.security.api_key.is_none());
    assert_eq!(settings.storage.max_file_age, Duration::from_secs(86_400));

    let pool = settings.pool.pool_config();
    assert_eq!(pool.gate.capacity, 5);
    assert_eq!(pool.gate.max_queue, 20);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.pool.max_concurrent = Some(2);

    let overrides = ServeOverrides {
        port: Some(4321),
        pool: PoolOverrides {
            log_level: Some("debug".to_string()),
            max_concurrent: Some(8),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.pool.max_concurrent.get(), 8);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        pool: PoolOverrides {
            log_json: Some(true),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_concurrency_is_rejected() {
    let mut raw = RawSettings::default();
    raw.pool.max_concurrent = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero workers");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "pool.max_concurrent",
            ..
        }
    ));
}

#[test]
fn zero_timeouts_are_rejected() {
    let mut raw = RawSettings::default();
    raw.pool.render_timeout_ms = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.pool.queue_timeout_ms = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn empty_queue_is_allowed() {
    let mut raw = RawSettings::default();
    raw.pool.max_queue = Some(0);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.pool.max_queue, 0);
}

#[test]
fn blank_api_key_means_open_access() {
    let mut raw = RawSettings::default();
    raw.security.api_key = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.security.api_key.is_none());
}

#[test]
fn proxy_headers_are_untrusted_and_cors_open_by_default() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert!(!settings.security.trust_forwarded_for);
    assert!(settings.security.cors_origins.is_empty());
    assert_eq!(
        settings.templates.fixtures_dir,
        PathBuf::from(DEFAULT_FIXTURES_DIR)
    );
}

#[test]
fn cors_origins_are_split_and_checked() {
    let mut raw = RawSettings::default();
    raw.security.cors_origins =
        Some(" https://designer.example.com/, http://localhost:5173 ,".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.security.cors_origins,
        vec!["https://designer.example.com", "http://localhost:5173"]
    );

    for bad in ["designer.example.com", "https://a.example/app", "https://"] {
        let mut raw = RawSettings::default();
        raw.security.cors_origins = Some(bad.to_string());
        assert!(
            matches!(
                Settings::from_raw(raw),
                Err(LoadError::Invalid {
                    key: "security.cors_origins",
                    ..
                })
            ),
            "{bad}"
        );
    }
}

#[test]
fn serve_flags_enable_forwarded_for_and_cors() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        trust_forwarded_for: true,
        cors_origins: Some("https://designer.example.com".to_string()),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.security.trust_forwarded_for);
    assert_eq!(
        settings.security.cors_origins,
        vec!["https://designer.example.com"]
    );
}

#[test]
fn engine_args_must_be_flags() {
    let mut raw = RawSettings::default();
    raw.engine.extra_args = Some(vec!["--lang=th".into(), "rm -rf".into()]);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "engine.extra_args",
            ..
        })
    ));
}

#[test]
fn flat_env_names_feed_pool_keys() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("MAX_CONCURRENT_WORKERS", "3"),
        ("MAX_QUEUE_LENGTH", "7"),
        ("QUEUE_TIMEOUT_MS", "1500"),
        ("RENDER_TIMEOUT_MS", ""),
        ("CORS_ORIGINS", "https://designer.example.com"),
    ]);

    let builder = apply_flat_env(Config::builder(), |name| {
        env.get(name).map(|value| value.to_string())
    })
    .expect("overrides");
    let raw: RawSettings = builder
        .build()
        .expect("build")
        .try_deserialize()
        .expect("deserialize");
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.pool.max_concurrent.get(), 3);
    assert_eq!(settings.pool.max_queue, 7);
    assert_eq!(settings.pool.queue_timeout, Duration::from_millis(1500));
    assert_eq!(
        settings.pool.render_timeout,
        Duration::from_millis(DEFAULT_RENDER_TIMEOUT_MS)
    );
    assert_eq!(
        settings.security.cors_origins,
        vec!["https://designer.example.com"]
    );
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["pdfsmith"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "pdfsmith",
        "render",
        "--template",
        "invoice",
        "--data",
        "invoice.json",
        "--output",
        "out.pdf",
        "--render-timeout-ms",
        "5000",
    ]);

    match args.command.expect("render command") {
        Command::Render(render) => {
            assert_eq!(render.template.as_deref(), Some("invoice"));
            assert!(render.html.is_none());
            assert_eq!(render.output, PathBuf::from("out.pdf"));
            assert_eq!(render.overrides.render_timeout_ms, Some(5000));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn render_requires_a_source() {
    let result = CliArgs::try_parse_from(["pdfsmith", "render", "--output", "out.pdf"]);
    assert!(result.is_err());
}
