use std::fs;

use pseudotest::activation::{self, Activation, ActivationConfig};
use tempfile::TempDir;

#[test]
fn disabled_enables_nothing() {
    let config = ActivationConfig::disabled();
    assert!(!config.mutation_enabled);
    assert!(!config.is_enabled("xmt:calc:add:1"));
}

#[test]
fn only_enables_listed_ids() {
    let config = ActivationConfig::only(vec!["xmt:calc:add:1".to_string()]);
    assert!(config.is_enabled("xmt:calc:add:1"));
    assert!(!config.is_enabled("xmt:calc:sub:1"));
}

#[test]
fn listed_ids_stay_off_when_mutation_is_disabled() {
    let config = ActivationConfig {
        mutation_enabled: false,
        enabled: ["xmt:calc:add:1".to_string()].into_iter().collect(),
    };
    assert!(!config.is_enabled("xmt:calc:add:1"));
}

#[test]
fn resolve_without_path_is_disabled() {
    assert_eq!(ActivationConfig::resolve(None), ActivationConfig::disabled());
}

#[test]
fn resolve_missing_file_is_disabled() {
    let dir = TempDir::new().unwrap();
    let config = ActivationConfig::resolve(Some(&dir.path().join("nope.json")));
    assert_eq!(config, ActivationConfig::disabled());
}

#[test]
fn resolve_malformed_file_is_disabled() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("activation.json");
    fs::write(&path, "{ not json").unwrap();
    assert_eq!(ActivationConfig::resolve(Some(&path)), ActivationConfig::disabled());
}

#[test]
fn materialized_file_resolves_to_the_same_set() {
    let config = ActivationConfig::only(vec![
        "sdl-if:calc:clamp:1".to_string(),
        "xmt:calc:add:1".to_string(),
    ]);
    let file = config.materialize().unwrap();
    assert_eq!(ActivationConfig::resolve(Some(file.path())), config);
}

#[test]
fn every_materialization_gets_its_own_file() {
    let a = ActivationConfig::only(vec!["xmt:m:a:1".to_string()]);
    let b = ActivationConfig::only(vec!["xmt:m:b:1".to_string()]);
    let fa = a.materialize().unwrap();
    let fb = b.materialize().unwrap();
    assert_ne!(fa.path(), fb.path());
    assert_eq!(ActivationConfig::resolve(Some(fa.path())), a);
    assert_eq!(ActivationConfig::resolve(Some(fb.path())), b);
}

#[test]
fn materialized_file_is_removed_on_drop() {
    let file = ActivationConfig::disabled().materialize().unwrap();
    let path = file.path().to_path_buf();
    assert!(path.exists());
    drop(file);
    assert!(!path.exists());
}

#[test]
fn partial_json_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("activation.json");
    fs::write(&path, r#"{"enabled": ["xmt:m:f:1"]}"#).unwrap();
    let config = ActivationConfig::resolve(Some(&path));
    assert!(!config.mutation_enabled);
    assert!(config.enabled.contains("xmt:m:f:1"));
}

#[test]
fn runtime_is_installed_at_the_root() {
    let dir = TempDir::new().unwrap();
    let path = activation::install_runtime(dir.path()).unwrap();
    assert_eq!(path, dir.path().join(activation::RUNTIME_FILE));
    let text = fs::read_to_string(path).unwrap();
    assert!(text.contains("def is_enabled(mutant_id):"));
    assert!(text.contains(activation::ACTIVATION_ENV));
    assert!(text.contains(activation::COVERAGE_ENV));
}
