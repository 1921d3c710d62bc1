//! Tests for config module

use pancake::config::{expand_tilde, Config};
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.compiler.table_name, "__quesma_table_name");
    assert_eq!(config.compiler.default_terms_size, 10);
    assert_eq!(config.compiler.default_sampler_shard_size, 100);
    assert_eq!(config.compiler.default_geotile_precision, 7);
    assert!(!config.compiler.add_total_count);
    assert_eq!(config.observability.log_format, "pretty");
    assert!(config.schema.dir.is_none());
}

#[test]
fn test_expand_tilde() {
    let home = dirs::home_dir().unwrap();

    let expanded = expand_tilde(&PathBuf::from("~/schemas")).unwrap();
    assert_eq!(expanded, home.join("schemas"));

    let expanded = expand_tilde(&PathBuf::from("~")).unwrap();
    assert_eq!(expanded, home);

    let expanded = expand_tilde(&PathBuf::from("/absolute/path")).unwrap();
    assert_eq!(expanded, PathBuf::from("/absolute/path"));
}

#[test]
fn test_load_missing_file_gives_defaults() {
    let temp = tempdir().unwrap();
    let config = Config::load_from(&temp.path().join("absent.toml")).unwrap();
    assert_eq!(config.compiler.default_terms_size, 10);
}

#[test]
fn test_save_and_load() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("nested/config.toml");

    let mut config = Config::default();
    config.compiler.table_name = "kibana_sample_data_flights".to_string();
    config.compiler.add_total_count = true;
    config.compiler.default_terms_size = 25;
    config.observability.log_format = "json".to_string();

    config.save(&config_path).unwrap();

    let loaded = Config::load_or_create(&config_path).unwrap();
    assert_eq!(loaded.compiler.table_name, "kibana_sample_data_flights");
    assert!(loaded.compiler.add_total_count);
    assert_eq!(loaded.compiler.default_terms_size, 25);
    assert_eq!(loaded.observability.log_format, "json");
}

#[test]
fn test_load_or_create_writes_defaults() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");

    Config::load_or_create(&config_path).unwrap();
    assert!(config_path.exists());
}

#[test]
fn test_partial_file_fills_defaults() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");
    std::fs::write(&config_path, "[compiler]\nadd_total_count = true\n").unwrap();

    let config = Config::load_from(&config_path).unwrap();
    assert!(config.compiler.add_total_count);
    assert_eq!(config.compiler.default_auto_buckets, 10);
    assert_eq!(config.observability.log_level, "info,pancake=debug");
}

#[test]
fn test_invalid_geotile_precision_rejected() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");
    std::fs::write(&config_path, "[compiler]\ndefault_geotile_precision = 40\n").unwrap();

    assert!(Config::load_from(&config_path).is_err());
}
