use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_describe_a_local_deployment() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.database.url.is_none());
    assert_eq!(settings.cache.max_entries.get(), DEFAULT_CACHE_MAX_ENTRIES);
    assert_eq!(settings.cache.ttl, Duration::from_secs(30 * 60));
    assert_eq!(settings.compile.default_passes, 3);
    assert!(settings.artifacts.delete_after_download);
    assert!(!settings.remote.enabled);
    assert_eq!(settings.remote.endpoints.len(), DEFAULT_REMOTE_ENDPOINTS.len());

    let limits = settings.compile.limits();
    assert_eq!(limits.default_timeout_ms, DEFAULT_TIMEOUT_MS);
    assert_eq!(limits.max_source_bytes, DEFAULT_MAX_SOURCE_BYTES as usize);
}

#[test]
fn blank_database_url_selects_the_local_queue() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_worker_concurrency_is_rejected() {
    let mut raw = RawSettings::default();
    raw.jobs.worker_concurrency = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero workers");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "jobs.worker_concurrency",
            ..
        }
    ));
}

#[test]
fn default_passes_must_be_in_range() {
    let mut raw = RawSettings::default();
    raw.compile.default_passes = Some(MAX_PASSES + 1);
    let err = Settings::from_raw(raw).expect_err("too many passes");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "compile.default_passes",
            ..
        }
    ));
}

#[test]
fn max_timeout_cannot_undercut_default() {
    let mut raw = RawSettings::default();
    raw.compile.default_timeout_ms = Some(60_000);
    raw.compile.max_timeout_ms = Some(10_000);
    let err = Settings::from_raw(raw).expect_err("inconsistent timeouts");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "compile.max_timeout_ms",
            ..
        }
    ));
}

#[test]
fn cache_cannot_outlive_artifacts() {
    let mut raw = RawSettings::default();
    raw.artifacts.retention_seconds = Some(600);
    raw.cache.ttl_seconds = Some(1800);
    let err = Settings::from_raw(raw).expect_err("cache outlives artifacts");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.ttl_seconds",
            ..
        }
    ));
}

#[test]
fn enabled_remote_requires_http_endpoints() {
    let mut raw = RawSettings::default();
    raw.remote.enabled = Some(true);
    raw.remote.endpoints = Some(vec!["ftp://example.org/compile".to_string()]);
    let err = Settings::from_raw(raw).expect_err("bad endpoint");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "remote.endpoints",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.remote.enabled = Some(true);
    raw.remote.endpoints = Some(Vec::new());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn serve_overrides_reach_nested_compile_settings() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        compile: CompileOverrides {
            scratch_dir: Some(PathBuf::from("/var/tmp/tex")),
            default_passes: Some(2),
            ..Default::default()
        },
        artifacts_delete_after_download: Some(false),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.compile.scratch_dir, PathBuf::from("/var/tmp/tex"));
    assert_eq!(settings.compile.default_passes, 2);
    assert!(!settings.artifacts.delete_after_download);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["texpress"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_compile_arguments() {
    let args = CliArgs::parse_from([
        "texpress",
        "compile",
        "paper.tex",
        "--output",
        "paper.pdf",
        "--engine",
        "xelatex",
        "--passes",
        "2",
        "--biber",
    ]);

    match args.command.expect("compile command") {
        Command::Compile(compile) => {
            assert_eq!(compile.file, PathBuf::from("paper.tex"));
            assert_eq!(compile.output, PathBuf::from("paper.pdf"));
            assert_eq!(compile.engine.as_deref(), Some("xelatex"));
            assert_eq!(compile.passes, Some(2));
            assert!(compile.biber);
            assert!(compile.bibliography.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
