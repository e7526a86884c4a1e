//! Test: Registry Introspection - listing, describing and templates

use crate::helpers::*;
use sateval::core::config::{PipelineConfig, StepConfig};
use sateval::execution::validate_step;
use sateval::persistence::InMemoryResultStore;
use sateval::{default_registry, EngineSettings, RegistryError};
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_describe_operations_is_idempotent() {
    let (registry, _) = test_registry();

    for module in registry.list_modules() {
        let first = registry.describe_operations(module).unwrap();
        let second = registry.describe_operations(module).unwrap();
        assert_eq!(first, second);
    }

    let loader = registry.describe_operations("loader").unwrap();
    assert_eq!(loader["fetch"].len(), 1);
    assert_eq!(loader["fetch"]["url"], "string");
}

#[test]
fn test_lookup_misses() {
    let (registry, _) = test_registry();
    assert_eq!(registry.list_modules(), vec!["batch", "faulty", "loader"]);
    assert_eq!(
        registry.describe_operations("nowhere"),
        Err(RegistryError::ModuleNotFound("nowhere".to_string()))
    );
    assert!(registry.describe("loader", "teleport").unwrap_err().is_not_found());
}

/// The built-in providers describe themselves and their templates validate
/// structurally
#[test]
fn test_builtin_registry_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let registry = default_registry(
        &EngineSettings::with_root(dir.path()),
        Arc::new(InMemoryResultStore::new()),
    )
    .unwrap();

    let noise = registry.describe_operations("simulated_noise_injector").unwrap();
    assert_eq!(noise["add_impulse_noise"]["prob"], "float");
    assert_eq!(noise["add_uniform_noise"]["low"], "integer");
    assert!(!noise["add_uniform_noise"].contains_key("run_id"));

    assert_eq!(noise["add_gaussian_noise"]["var"], "float");
    assert_eq!(noise["add_periodic_noise"]["frequency"], "integer");
    assert_eq!(noise["add_poisson_noise"].keys().collect::<Vec<_>>(), vec!["file_type", "input_path", "output_folder"]);

    let loader = registry.describe_operations("dataset_loader").unwrap();
    assert_eq!(loader["load_by_url"].keys().collect::<Vec<_>>(), vec!["file_name", "url"]);
    assert_eq!(
        loader["unzip_file"].keys().collect::<Vec<_>>(),
        vec!["destination_folder", "zip_file_path_or_name"]
    );

    let compressor = registry.describe_operations("compressor").unwrap();
    assert_eq!(compressor["compress_jpeg"]["quality"], "integer");
    assert!(!compressor["compress_png"].contains_key("run_id"));

    let decompressor = registry.describe_operations("decompressor").unwrap();
    assert_eq!(
        decompressor.keys().collect::<Vec<_>>(),
        vec!["decompress_jpeg", "decompress_png"]
    );

    // The template's placeholder parameter is not declared
    let template = serde_json::to_value(StepConfig::template()).unwrap();
    assert!(validate_step(&template, &registry).is_err());

    let pipeline = PipelineConfig::template().to_value();
    assert_eq!(pipeline[0]["executionPath"], json!("dataset_loader:load_by_url"));
}
