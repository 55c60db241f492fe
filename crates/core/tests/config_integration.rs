//! sifter.toml 통합 설정 테스트
//!
//! - sifter.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 잘못된 형식 에러 테스트

use sifter_core::config::SifterConfig;
use sifter_core::error::{ConfigError, SifterError};
use sifter_core::types::Tlp;

// =============================================================================
// sifter.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let content = include_str!("../../../sifter.toml.example");
    let config = SifterConfig::parse(content).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "pretty");
}

#[test]
fn example_config_passes_validation() {
    let content = include_str!("../../../sifter.toml.example");
    let config = SifterConfig::parse(content).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_matches_code_defaults() {
    let content = include_str!("../../../sifter.toml.example");
    let example = SifterConfig::parse(content).expect("should parse");
    let defaults = SifterConfig::default();

    assert_eq!(example.dispatch.auto_dispatch, defaults.dispatch.auto_dispatch);
    assert_eq!(example.dispatch.max_recursion, defaults.dispatch.max_recursion);
    assert_eq!(example.dispatch.max_processes, defaults.dispatch.max_processes);
    assert_eq!(example.dispatch.rate_limit, defaults.dispatch.rate_limit);
    assert_eq!(
        example.dispatch.no_match_policy,
        defaults.dispatch.no_match_policy
    );
    assert_eq!(example.output.connectors, defaults.output.connectors);
    assert_eq!(example.output.split, defaults.output.split);
    assert_eq!(example.output.template, defaults.output.template);
    assert_eq!(example.output.outfile, defaults.output.outfile);
    assert_eq!(example.ingest.source, defaults.ingest.source);
    assert_eq!(example.error_queue.enabled, defaults.error_queue.enabled);
    assert_eq!(example.error_queue.path, defaults.error_queue.path);
}

// =============================================================================
// 부분 설정 테스트
// =============================================================================

#[test]
fn partial_config_output_only() {
    let toml = r#"
[output]
connectors = ["file"]
split = true
"#;
    let config = SifterConfig::parse(toml).expect("should parse");
    assert_eq!(config.output.connectors, vec!["file"]);
    assert!(config.output.split);
    assert_eq!(config.dispatch.max_recursion, 3);
    assert_eq!(config.ingest.source, "file");
}

#[test]
fn partial_config_ingest_with_tagging() {
    let toml = r#"
[ingest]
path = "/samples"
tlp = "green"
metadata = ["campaign:APT1"]
"#;
    let config = SifterConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");
    assert_eq!(config.default_tlp(), Some(Tlp::Green));
    assert_eq!(config.ingest.metadata, vec!["campaign:APT1"]);
}

#[test]
fn unknown_field_type_is_parse_error() {
    let toml = r#"
[dispatch]
max_recursion = "deep"
"#;
    let err = SifterConfig::parse(toml).unwrap_err();
    assert!(matches!(
        err,
        SifterError::Config(ConfigError::ParseFailed { .. })
    ));
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[dispatch]
rate_limit = "10/1"
"#;

    let original = std::env::var("SIFTER_DISPATCH_RATE_LIMIT").ok();
    // SAFETY: serial 테스트이므로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
    unsafe {
        std::env::set_var("SIFTER_DISPATCH_RATE_LIMIT", "5/60");
    }

    let mut config = SifterConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    let result = config.dispatch.rate_limit.clone();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("SIFTER_DISPATCH_RATE_LIMIT", val),
            None => std::env::remove_var("SIFTER_DISPATCH_RATE_LIMIT"),
        }
    }

    assert_eq!(result, "5/60");
}

#[test]
#[serial_test::serial]
fn env_override_csv_for_metadata() {
    let original = std::env::var("SIFTER_INGEST_METADATA").ok();
    // SAFETY: serial 테스트이므로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
    unsafe {
        std::env::set_var("SIFTER_INGEST_METADATA", "case:42, analyst:lee");
    }

    let mut config = SifterConfig::default();
    config.apply_env_overrides();
    let result = config.ingest.metadata.clone();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("SIFTER_INGEST_METADATA", val),
            None => std::env::remove_var("SIFTER_INGEST_METADATA"),
        }
    }

    assert_eq!(result, vec!["case:42", "analyst:lee"]);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_then_validates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sifter.toml");
    tokio::fs::write(&path, "[dispatch]\nmax_processes = 2\n")
        .await
        .expect("write config");

    let original = std::env::var("SIFTER_DISPATCH_MAX_PROCESSES").ok();
    // SAFETY: serial 테스트이므로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
    unsafe {
        std::env::set_var("SIFTER_DISPATCH_MAX_PROCESSES", "0");
    }

    let result = SifterConfig::load(&path).await;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("SIFTER_DISPATCH_MAX_PROCESSES", val),
            None => std::env::remove_var("SIFTER_DISPATCH_MAX_PROCESSES"),
        }
    }

    let err = result.expect_err("env override should fail validation");
    assert!(err.to_string().contains("max_processes"));
}
