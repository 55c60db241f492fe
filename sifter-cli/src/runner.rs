//! 설정 로딩과 엔진 실행
//!
//! 설정 우선순위: CLI 플래그 > 환경변수 > 설정 파일 > 기본값

use std::sync::Arc;
use std::time::Instant;

use sifter_core::config::SifterConfig;
use sifter_dispatch::{EngineBuilder, EngineConfig};

use crate::builtin;
use crate::cli::Cli;
use crate::error::CliError;
use crate::output::{PluginList, RunSummary};

/// 설정 파일(있으면)과 환경변수를 읽은 뒤 CLI 플래그를 적용합니다.
pub async fn load_config(cli: &Cli) -> Result<SifterConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => SifterConfig::load(path).await?,
        None => {
            let mut config = SifterConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// 설정 파일 없이 문자열에서 설정을 만들고 CLI 플래그를 적용합니다.
pub fn config_from_str(toml: &str, cli: &Cli) -> Result<SifterConfig, CliError> {
    let mut config = SifterConfig::parse(toml)?;
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// 내장 플러그인 목록을 반환합니다.
pub fn list_plugins(config: &SifterConfig) -> Result<PluginList, CliError> {
    let registry = builtin::registry(config)?;
    Ok(PluginList {
        plugins: registry.list().into_iter().cloned().collect(),
    })
}

/// 설정대로 엔진을 구성하고 소스가 끝날 때까지 처리합니다.
///
/// # Errors
/// 규칙 로딩 실패, 잘못된 설정, 알 수 없는 플러그인, 에러 큐 기록 실패,
/// 소스 실패는 치명적입니다.
pub async fn run(config: &SifterConfig) -> Result<RunSummary, CliError> {
    sifter_core::metrics::describe_all();

    let registry = Arc::new(builtin::registry(config)?);
    let source_name = builtin::source_name(config).to_owned();
    let source = registry.resolve_source(&source_name)?;

    let engine = EngineBuilder::new()
        .config(EngineConfig::from_core(config)?)
        .registry(Arc::clone(&registry))
        .build()
        .await?;

    tracing::info!(
        source = %source_name,
        path = %config.ingest.path,
        auto_dispatch = config.dispatch.auto_dispatch,
        max_recursion = config.dispatch.max_recursion,
        max_processes = config.dispatch.max_processes,
        "sifter starting"
    );

    let started = Instant::now();
    let stats = engine.run(source, &config.ingest).await?;

    Ok(RunSummary {
        source: source_name,
        elapsed_ms: started.elapsed().as_millis(),
        stats,
    })
}
