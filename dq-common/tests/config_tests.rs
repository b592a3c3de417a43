//! Unit tests for configuration loading and root folder resolution
//!
//! Tests that manipulate DQ_ROOT_FOLDER are marked #[serial] so they do not
//! race each other on the process environment.

use dq_common::config::{
    load_toml_config, prepare_database_path, resolve_root_folder, write_toml_config, TomlConfig,
    DATABASE_FILE_NAME, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/dq-env-root");

    let root = resolve_root_folder(Some(Path::new("/tmp/dq-cli-root")), ROOT_FOLDER_ENV, None);
    assert_eq!(root, PathBuf::from("/tmp/dq-cli-root"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_wins_over_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/dq-env-root");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/dq-toml-root")),
        ..Default::default()
    };

    let root = resolve_root_folder(None, ROOT_FOLDER_ENV, Some(&toml));
    assert_eq!(root, PathBuf::from("/tmp/dq-env-root"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_used_when_env_missing() {
    env::remove_var(ROOT_FOLDER_ENV);
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/dq-toml-root")),
        ..Default::default()
    };

    let root = resolve_root_folder(None, ROOT_FOLDER_ENV, Some(&toml));
    assert_eq!(root, PathBuf::from("/tmp/dq-toml-root"));
}

#[test]
#[serial]
fn test_default_root_folder_when_nothing_configured() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root = resolve_root_folder(None, ROOT_FOLDER_ENV, None);
    assert!(!root.as_os_str().is_empty());
    assert!(root.to_string_lossy().contains("drivequiz"));
}

#[test]
fn test_prepare_database_path_creates_folder() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("nested").join("root");

    let db_path = prepare_database_path(&root).unwrap();

    assert!(root.is_dir());
    assert_eq!(db_path, root.join(DATABASE_FILE_NAME));
}

#[test]
fn test_missing_toml_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.scanner.page_size, 200);
    assert_eq!(config.orchestrator.default_batch_size, 10);
    assert!(config.answer_cache.enabled);
}

#[test]
fn test_partial_toml_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dq-qp.toml");
    std::fs::write(
        &path,
        r#"
[ai_service]
base_url = "http://localhost:8788"

[scanner]
page_size = 50
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.ai_service.base_url.as_deref(), Some("http://localhost:8788"));
    assert_eq!(config.ai_service.token, None);
    assert_eq!(config.scanner.page_size, 50);
    assert_eq!(config.orchestrator.default_batch_size, 10);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_toml_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[scanner\npage_size = ").unwrap();

    assert!(load_toml_config(&path).is_err());
}

#[test]
fn test_write_then_load_preserves_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg").join("dq-qp.toml");

    let mut config = TomlConfig::default();
    config.ai_service.token = Some("secret".to_string());
    config.answer_cache.capacity = 16;

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded, config);
    assert!(!path.with_extension("toml.tmp").exists());
}
