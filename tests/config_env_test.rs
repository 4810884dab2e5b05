use std::fs;

use folio::ViewerConfig;
use folio::config::DEFAULT_API_BASE_URL;
use serial_test::serial;
use tempfile::TempDir;

const API_URL_ENV: &str = "FOLIO_API_URL";

fn set_env(value: &str) {
    // Tests touching the environment run serially
    unsafe { std::env::set_var(API_URL_ENV, value) };
}

fn clear_env() {
    unsafe { std::env::remove_var(API_URL_ENV) };
}

#[test]
#[serial]
fn env_var_overrides_api_base_url() {
    set_env("https://docs.example.org/api");
    let mut config = ViewerConfig::default();
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.api_base_url, "https://docs.example.org/api");
}

#[test]
#[serial]
fn blank_env_var_is_ignored() {
    set_env("   ");
    let mut config = ViewerConfig::default();
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
}

#[test]
#[serial]
fn env_var_wins_over_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "api_base_url: http://from-file:9000\npreload: false\n").unwrap();

    set_env("http://from-env:7000");
    let mut config = ViewerConfig::load_from_path(&path);
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.api_base_url, "http://from-env:7000");
    assert!(!config.preload);
}
