use keel_engine::{
    CURRENT_VERSION, ConfigError, EngineConfig, EventPolicy, ReplaceStrategy, load_config,
    parse_config, save_config,
};

#[test]
fn empty_object_uses_defaults() {
    let config = parse_config("{}").unwrap();
    assert_eq!(config.config_version, CURRENT_VERSION);
    assert_eq!(config.parallel, 10);
    assert_eq!(config.event_policy, EventPolicy::Block);
    assert_eq!(config.replace_strategy, ReplaceStrategy::CreateBeforeDelete);
    assert!(config.verify_snapshots);
    assert!(!config.auto_approve);
}

#[test]
fn unversioned_flag_migrates_to_strategy() {
    let config = parse_config(r#"{"delete_before_replace": true, "parallel": 4}"#).unwrap();
    assert_eq!(config.config_version, 1);
    assert_eq!(config.replace_strategy, ReplaceStrategy::DeleteBeforeCreate);
    assert_eq!(config.parallel, 4);

    let config = parse_config(r#"{"delete_before_replace": false}"#).unwrap();
    assert_eq!(config.replace_strategy, ReplaceStrategy::CreateBeforeDelete);
}

#[test]
fn explicit_strategy_wins_over_legacy_flag() {
    let config = parse_config(
        r#"{"delete_before_replace": false, "replace_strategy": "delete_before_create"}"#,
    )
    .unwrap();
    assert_eq!(config.replace_strategy, ReplaceStrategy::DeleteBeforeCreate);
}

#[test]
fn newer_version_is_rejected() {
    let err = parse_config(r#"{"config_version": 7}"#).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::UnsupportedVersion {
            found: 7,
            supported: CURRENT_VERSION
        }
    ));
}

#[test]
fn non_object_is_rejected() {
    let err = parse_config("[1, 2]").unwrap_err();
    assert!(matches!(err, ConfigError::NotAnObject));
}

#[test]
fn zero_parallelism_is_invalid() {
    let err = parse_config(r#"{"config_version": 1, "parallel": 0}"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let err = parse_config(r#"{"config_version": 1, "event_buffer": 0}"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn save_then_load_keeps_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("engine.json");

    let config = EngineConfig {
        config_version: 0,
        parallel: 3,
        event_policy: EventPolicy::DropWhenFull,
        replace_strategy: ReplaceStrategy::DeleteBeforeCreate,
        reuse_preview_plan: true,
        ..EngineConfig::default()
    };
    save_config(&path, &config).unwrap();
    assert!(!path.with_extension("json.tmp").exists());

    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded.config_version, CURRENT_VERSION);
    assert_eq!(loaded.parallel, 3);
    assert_eq!(loaded.event_policy, EventPolicy::DropWhenFull);
    assert_eq!(loaded.replace_strategy, ReplaceStrategy::DeleteBeforeCreate);
    assert!(loaded.reuse_preview_plan);
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = load_config(&path).unwrap_err();
    match err {
        ConfigError::Read { path: reported, .. } => assert!(reported.ends_with("absent.json")),
        other => panic!("expected Read error, got {other:?}"),
    }
}
