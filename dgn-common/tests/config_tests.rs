//! Integration tests for configuration resolution and graceful degradation
//!
//! Tests that manipulate DGN_CONFIG are marked with #[serial] so they run
//! sequentially, not in parallel.

use dgn_common::config::{load_config, TomlConfig, CONFIG_ENV_VAR, DEFAULT_COOLDOWN_MINUTES};
use dgn_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
#[serial]
fn test_explicit_path_takes_priority_over_env() {
    let dir = TempDir::new().unwrap();
    let explicit = write_config(&dir, "explicit.toml", "[refetch]\ncooldown_minutes = 5\n");
    let from_env = write_config(&dir, "env.toml", "[refetch]\ncooldown_minutes = 99\n");

    env::set_var(CONFIG_ENV_VAR, &from_env);
    let config = load_config(Some(&explicit)).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.refetch.cooldown_minutes, 5);
}

#[test]
#[serial]
fn test_env_var_path_is_used() {
    let dir = TempDir::new().unwrap();
    let from_env = write_config(
        &dir,
        "env.toml",
        "[refetch]\ncooldown_minutes = 15\n\n[logging]\nlevel = \"debug\"\n",
    );

    env::set_var(CONFIG_ENV_VAR, &from_env);
    let config = load_config(None).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.refetch.cooldown_minutes, 15);
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_env_var_pointing_at_missing_file_degrades_to_defaults() {
    env::set_var(CONFIG_ENV_VAR, "/nonexistent/dgn-test/config.toml");
    let config = load_config(None).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.refetch.cooldown_minutes, DEFAULT_COOLDOWN_MINUTES);
}

#[test]
#[serial]
fn test_missing_explicit_path_is_an_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.toml");

    let err = load_config(Some(&missing)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
#[serial]
fn test_invalid_values_in_file_report_path() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "bad.toml", "[refetch]\nforecast_half_life_days = -3.0\n");

    let err = load_config(Some(&path)).unwrap_err();
    match err {
        Error::Config(message) => assert!(message.contains("bad.toml")),
        other => panic!("expected config error, got {:?}", other),
    }
}
