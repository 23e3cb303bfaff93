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
fn defaults_resolve_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.to_string(), "127.0.0.1:3000");
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert_eq!(settings.content.root, PathBuf::from("public"));
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.cache_name, DEFAULT_CACHE_NAME);
    assert_eq!(settings.cache.scope, CacheScope::Instance);
    assert_eq!(settings.cache.store_limit, DEFAULT_CACHE_STORE_LIMIT);
    assert_eq!(settings.cache.paths.len(), DEFAULT_CACHE_PATHS.len());
    assert_eq!(settings.cache.patterns.len(), DEFAULT_CACHE_PATTERNS.len());
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
fn cache_overrides_apply_from_cli() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        cache_enabled: Some(false),
        cache_store_limit: Some(16),
        content_root: Some(PathBuf::from("/srv/site")),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(!settings.cache.enabled);
    assert_eq!(settings.cache.store_limit, 16);
    assert_eq!(settings.content.root, PathBuf::from("/srv/site"));
}

#[test]
fn explicit_empty_rule_lists_replace_defaults() {
    let mut raw = RawSettings::default();
    raw.cache.paths = Some(Vec::new());
    raw.cache.patterns = Some(vec!["root;.*\\.css$;.requestCache:30".to_string()]);

    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.cache.paths.is_empty());
    assert_eq!(settings.cache.patterns.len(), 1);
}

#[test]
fn zero_store_limit_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.store_limit = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero limit");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.store_limit",
            ..
        }
    ));
}

#[test]
fn blank_cache_name_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.cache_name = Some("   ".to_string());

    let err = Settings::from_raw(raw).expect_err("blank name");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.cache_name",
            ..
        }
    ));
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());

    let err = Settings::from_raw(raw).expect_err("bad level");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

#[test]
fn scope_deserializes_from_lowercase() {
    let raw: RawCacheSettings =
        serde_json::from_str(r#"{"scope": "cluster"}"#).expect("valid cache table");
    assert_eq!(raw.scope, Some(CacheScope::Cluster));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["rewind"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_arguments() {
    let args = CliArgs::parse_from([
        "rewind",
        "serve",
        "--server-port",
        "8080",
        "--log-json",
        "yes",
        "--cache-enabled",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_port, Some(8080));
            assert_eq!(serve.overrides.log_json, Some(true));
            assert_eq!(serve.overrides.cache_enabled, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_check_rules_arguments() {
    let args = CliArgs::parse_from(["rewind", "check-rules", "--path", "/p/index.html"]);

    match args.command.expect("check-rules command") {
        Command::CheckRules(check) => {
            assert_eq!(check.path.as_deref(), Some("/p/index.html"));
        }
        _ => panic!("wrong command parsed"),
    }
}
