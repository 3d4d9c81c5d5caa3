//! Unit tests for configuration loading and graceful degradation
//!
//! Covers:
//! - Missing config files fall back to compiled defaults
//! - Priority order: explicit path, environment variable, defaults
//! - Malformed or invalid files are reported as errors
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate EDGECLOCK_CONFIG are marked with #[serial].

use edgeclock_common::config::{
    load_config, resolve_config_path, EngineConfig, TomlConfig, CONFIG_ENV_VAR,
};
use edgeclock_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
#[serial]
fn test_explicit_path_takes_priority_over_env() {
    let dir = TempDir::new().unwrap();
    let explicit = write_config(&dir, "explicit.toml", "[engine]\nlatency_sec = 11.0\n");
    let from_env = write_config(&dir, "env.toml", "[engine]\nlatency_sec = 22.0\n");

    env::set_var(CONFIG_ENV_VAR, &from_env);
    let config = load_config(Some(&explicit)).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.engine.latency_sec, 11.0);
}

#[test]
#[serial]
fn test_env_var_used_when_no_explicit_path() {
    let dir = TempDir::new().unwrap();
    let from_env = write_config(&dir, "env.toml", "[engine]\nlatency_sec = 22.0\n");

    env::set_var(CONFIG_ENV_VAR, &from_env);
    assert_eq!(resolve_config_path(None), Some(from_env.clone()));
    let config = load_config(None).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.engine.latency_sec, 22.0);
}

#[test]
#[serial]
fn test_missing_explicit_file_uses_defaults() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist.toml");

    let config = load_config(Some(&missing)).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "broken.toml", "[engine\nlatency_sec = ");

    let result = load_config(Some(&path));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_invalid_values_are_an_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "invalid.toml", "[engine.pll]\nmax_rate_per_sec = -1.0\n");

    let result = load_config(Some(&path));
    match result {
        Err(Error::Config(message)) => assert!(message.contains("max_rate_per_sec")),
        other => panic!("Expected Config error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_full_file_round_trips_every_section() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "full.toml",
        r#"
[engine]
latency_sec = 15.0
edge_slack_sec = 4.0
near_live_slack_sec = 6.0
edge_backoff_sec = 1.0
seekable_anomaly_sec = 90.0
end_recheck_ms = 300
probe_interval_ms = 500

[engine.lock]
seeked_unlock_ms = 2000
playing_unlock_ms = 100

[engine.pll]
hys_sec = 1.5
consec_n = 4
alpha = 0.05
max_rate_per_sec = 0.01
outlier_e_sec = 3000.0
interval_ms = 500

[engine.skew]
lead_band_min_sec = 3100.0
lead_band_max_sec = 4100.0
ring_len = 3
fallback_ttl_ms = 60000

[logging]
level = "debug"
"#,
    );

    let config = load_config(Some(&path)).unwrap();
    let engine: EngineConfig = config.engine;
    assert_eq!(engine.latency_sec, 15.0);
    assert_eq!(engine.end_recheck_ms, 300);
    assert_eq!(engine.lock.seeked_unlock_ms, 2000);
    assert_eq!(engine.pll.consec_n, 4);
    assert_eq!(engine.pll.interval_ms, 500);
    assert_eq!(engine.skew.ring_len, 3);
    assert_eq!(engine.skew.fallback_ttl_ms, 60_000);
    assert_eq!(config.logging.level, "debug");
}
