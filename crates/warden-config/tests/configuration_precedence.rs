//! Layer precedence across defaults, the configuration file, and overrides.

use std::fs;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use warden_config::{ConfigLayer, EffectiveConfig, default_layer, resolve};

struct ConfigFile {
    _dir: TempDir,
    path: Utf8PathBuf,
}

#[fixture]
fn config_file() -> ConfigFile {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("warden.yaml")).expect("utf-8 path");
    fs::write(
        &path,
        "APP: warden.listener\nserver_port: 9001\nServer_Threads: 4\nserver_name: file.example\n",
    )
    .expect("write config");
    ConfigFile { _dir: dir, path }
}

fn resolve_file(file: &ConfigFile, overrides: &ConfigLayer) -> EffectiveConfig {
    let layer = ConfigLayer::load(&file.path).expect("config should load");
    resolve(&default_layer(), &layer, overrides).expect("config should resolve")
}

#[rstest]
fn file_values_override_defaults(config_file: ConfigFile) {
    let config = resolve_file(&config_file, &ConfigLayer::new());
    assert_eq!(config.app(), "warden.listener");
    assert_eq!(config.bind().port(), 9001);
    assert_eq!(config.threads().get(), 4);
    assert_eq!(config.bind().host(), "127.0.0.1");
}

#[rstest]
fn overrides_win_over_file_values_regardless_of_case(config_file: ConfigFile) {
    let overrides = ConfigLayer::new()
        .with("SERVER_PORT", 9100)
        .with("Force", true);
    let config = resolve_file(&config_file, &overrides);
    assert_eq!(config.bind().port(), 9100);
    assert_eq!(config.server_name(), "file.example");
    assert!(config.force());
}

#[rstest]
fn resolving_twice_yields_equal_configs(config_file: ConfigFile) {
    let first = resolve_file(&config_file, &ConfigLayer::new());
    let second = resolve_file(&config_file, &ConfigLayer::new());
    assert_eq!(first, second);
}
