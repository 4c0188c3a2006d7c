//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Configuration source precedence with the environment override set."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Kept as its own test binary with a single test so the process-wide
//! environment variable cannot leak into other loading tests.
use std::fs;

use gz_common::config::AppConfig;
use tempfile::tempdir;

fn write_capacity(path: &std::path::Path, capacity: usize) {
    fs::write(path, format!("[history]\ncapacity = {capacity}\n")).unwrap();
}

#[test]
fn explicit_then_env_then_candidates() {
    let dir = tempdir().expect("tempdir");
    let explicit = dir.path().join("explicit.toml");
    let from_env = dir.path().join("env.toml");
    let candidate = dir.path().join("monitor.toml");
    write_capacity(&explicit, 7);
    write_capacity(&from_env, 99);
    write_capacity(&candidate, 42);

    std::env::set_var(AppConfig::ENV_CONFIG_PATH, &from_env);

    let loaded = AppConfig::load_with_source(Some(explicit.as_path()), &[candidate.clone()]).unwrap();
    assert_eq!(loaded.source, explicit);
    assert_eq!(loaded.config.history.capacity, 7);

    let loaded = AppConfig::load_with_source(None, &[candidate.clone()]).unwrap();
    assert_eq!(loaded.source, from_env);
    assert_eq!(loaded.config.history.capacity, 99);

    std::env::remove_var(AppConfig::ENV_CONFIG_PATH);

    let loaded = AppConfig::load_with_source(None, &[candidate.clone()]).unwrap();
    assert_eq!(loaded.source, candidate);
    assert_eq!(loaded.config.history.capacity, 42);
}
