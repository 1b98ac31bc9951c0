//! Configuration resolution and graceful degradation
//!
//! Tests touching BLT_* environment variables are #[serial] so they never race.

use blt_common::config::{
    load_or_default, load_toml_config, resolve_app_token, write_toml_config, CompiledDefaults,
    RootFolderInitializer, RootFolderResolver, TomlConfig, ROOT_FOLDER_ENV, SOCRATA_TOKEN_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
    assert!(defaults.root_folder.to_string_lossy().contains("blt"));
}

#[test]
fn test_default_pipeline_settings() {
    let config = TomlConfig::default();

    assert_eq!(config.pipeline.geocode_confidence_threshold, 0.8);
    assert_eq!(config.retry.max_attempts, 3);
    assert!(config.pipeline.missing_factor_default.is_none());
    assert_eq!(config.registries.energy_dataset, "5zyy-y8am");
}

#[test]
fn test_partial_toml_fills_defaults() {
    let config: TomlConfig = toml::from_str(
        r#"
        [pipeline]
        concurrency = 2

        [retry]
        max_attempts = 5
        "#,
    )
    .unwrap();

    assert_eq!(config.pipeline.concurrency, 2);
    assert_eq!(config.pipeline.staleness_hours, 24);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.initial_backoff_ms, 500);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_missing_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_or_default(Some(&temp_dir.path().join("absent.toml")));
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_invalid_file_uses_defaults_but_strict_load_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "root_folder = [").unwrap();

    assert!(load_toml_config(&path).is_err());
    assert_eq!(load_or_default(Some(&path)), TomlConfig::default());
}

#[test]
fn test_write_then_load_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("blt-ingest.toml");

    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/srv/blt"));
    config.pipeline.missing_factor_default = Some("0.00758".to_string());

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded, config);
    assert!(!path.with_extension("toml.tmp").exists());
}

#[test]
#[serial]
fn test_root_folder_priority() {
    env::remove_var(ROOT_FOLDER_ENV);
    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/from/toml"));

    let resolver = RootFolderResolver::new(&config);
    assert_eq!(resolver.resolve(), PathBuf::from("/from/toml"));

    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    assert_eq!(resolver.resolve(), PathBuf::from("/from/env"));

    let resolver = RootFolderResolver::new(&config).with_cli_arg(Some(PathBuf::from("/from/cli")));
    assert_eq!(resolver.resolve(), PathBuf::from("/from/cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_root_folder_falls_back_to_default() {
    env::remove_var(ROOT_FOLDER_ENV);
    let resolved = RootFolderResolver::new(&TomlConfig::default()).resolve();
    assert_eq!(resolved, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_app_token_env_beats_toml() {
    let mut config = TomlConfig::default();
    config.registries.app_token = Some("toml-token".to_string());

    env::remove_var(SOCRATA_TOKEN_ENV);
    assert_eq!(resolve_app_token(&config), Some("toml-token".to_string()));

    env::set_var(SOCRATA_TOKEN_ENV, "env-token");
    assert_eq!(resolve_app_token(&config), Some("env-token".to_string()));

    env::set_var(SOCRATA_TOKEN_ENV, "   ");
    assert_eq!(resolve_app_token(&config), Some("toml-token".to_string()));

    env::remove_var(SOCRATA_TOKEN_ENV);
    config.registries.app_token = None;
    assert_eq!(resolve_app_token(&config), None);
}

#[test]
fn test_initializer_creates_folder() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("data");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join("blt.db"));
}
