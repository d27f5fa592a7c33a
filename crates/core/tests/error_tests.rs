//! Tests for error types

use stagecache_core::Error;

#[test]
fn test_invalid_usage_error() {
    let error = Error::invalid_usage("double", "unexpected arguments: y");
    assert_eq!(
        error.to_string(),
        "Invalid call to stage 'double': unexpected arguments: y"
    );
}

#[test]
fn test_unknown_stage_error() {
    let error = Error::unknown_stage("triple");
    assert_eq!(error.to_string(), "Unknown stage: triple");
}

#[test]
fn test_configuration_error() {
    let error = Error::configuration("bad settings");
    assert_eq!(error.to_string(), "Configuration error: bad settings");
}

#[test]
fn test_stage_computation_keeps_source() {
    let error = Error::stage_computation("embed", "out of memory".into());
    assert_eq!(error.to_string(), "Stage 'embed' failed");
    let source = std::error::Error::source(&error).unwrap();
    assert_eq!(source.to_string(), "out of memory");
}

#[test]
fn test_persistence_error() {
    let error = Error::persistence(
        "embed",
        stagecache_cache::Error::serialization("bad payload"),
    );
    assert_eq!(error.to_string(), "Failed to persist result of stage 'embed'");
    let source = std::error::Error::source(&error).unwrap();
    assert_eq!(source.to_string(), "Serialization error: bad payload");
}

#[test]
fn test_graph_error_conversion() {
    let error: Error = stagecache_stage_graph::Error::DuplicateStage {
        name: "load".to_string(),
    }
    .into();
    assert!(matches!(error, Error::Graph { .. }));
    assert_eq!(
        error.to_string(),
        "Invalid stage graph: Stage 'load' is registered more than once"
    );
}

#[test]
fn test_diagnostic_codes() {
    use miette::Diagnostic;

    let error = Error::invalid_usage("s", "m");
    assert_eq!(
        error.code().map(|c| c.to_string()),
        Some("stagecache::invalid_usage".to_string())
    );
    assert!(error.help().is_some());
}
