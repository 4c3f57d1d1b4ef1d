//! Engine configuration files

mod common;

use phaseflow::config::{EngineConfig, DEFAULT_BUDGET_BYTES};
use phaseflow::pipeline::nodes::{collect, generate, Collected};
use phaseflow::pipeline::OrderMode;
use phaseflow::PhaseflowError;
use tempfile::TempDir;

fn custom() -> EngineConfig {
    let mut config = EngineConfig::new();
    config.memory.budget_bytes = 4096;
    config.parallel.workers = 3;
    config.parallel.order = OrderMode::Arbitrary;
    config.logging.filter = "phaseflow=debug".to_string();
    config
}

#[test]
fn test_toml_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("phaseflow.toml");
    let config = custom();
    config.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[memory]"));
    assert_eq!(EngineConfig::load(&path).unwrap(), config);
}

#[test]
fn test_json_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("phaseflow.json");
    let config = custom();
    config.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.trim_start().starts_with('{'));
    assert!(text.contains("\"arbitrary\""));
    assert_eq!(EngineConfig::load(&path).unwrap(), config);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(matches!(
        EngineConfig::load(&path),
        Err(PhaseflowError::Config(_))
    ));
    let config = EngineConfig::load_or_default(&path);
    assert_eq!(config.memory.budget_bytes, DEFAULT_BUDGET_BYTES);
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "memory = [not toml").unwrap();
    assert!(matches!(
        EngineConfig::load(&path),
        Err(PhaseflowError::Config(_))
    ));
}

#[test]
fn test_run_with_config_uses_budget() {
    let out = Collected::<u64>::new();
    let mut pipeline = (generate(5, |i| i) | collect(&out).minimum_memory(1024))
        .build()
        .unwrap();
    let summary = pipeline.run_with_config(&custom()).unwrap();
    assert!(summary.phases[0].assigned_bytes <= 4096);
    assert!(summary.phases[0].assigned_bytes >= 1024);
    assert!(!summary.phases[0].overcommitted);
    assert_eq!(out.take().len(), 5);
}
