//! 내장 플러그인과 레지스트리 구성
//!
//! | 유형      | 이름          | 구현                         |
//! |-----------|---------------|------------------------------|
//! | source    | `file`        | [`sources::FileSource`]      |
//! | source    | `error-queue` | [`sources::ErrorQueueSource`]|
//! | worker    | `magic`       | [`workers::MagicWorker`]     |
//! | worker    | `strings`     | [`workers::StringsWorker`]   |
//! | worker    | `carve`       | [`workers::CarveWorker`]     |
//! | connector | `stdout`      | [`connectors::StdoutConnector`] |
//! | connector | `file`        | [`connectors::FileConnector`]   |
//! | archive   | `dir`         | [`connectors::DirArchive`]      |

pub mod connectors;
pub mod sources;
pub mod workers;

use std::sync::Arc;

use sifter_core::config::SifterConfig;
use sifter_core::error::PluginError;
use sifter_core::plugin::PluginRegistry;

use connectors::{DirArchive, FileConnector, StdoutConnector, template_from_config};
use sources::{ErrorQueueSource, FileSource};
use workers::{CarveWorker, MagicWorker, StringsWorker};

/// 에러 큐 재처리에 쓰이는 소스 이름
pub const ERROR_QUEUE_SOURCE: &str = "error-queue";

/// 설정을 반영한 내장 플러그인 레지스트리를 생성합니다.
pub fn registry(config: &SifterConfig) -> Result<PluginRegistry, PluginError> {
    let mut registry = PluginRegistry::new();

    registry.register_source(Arc::new(FileSource::new()))?;
    registry.register_source(Arc::new(ErrorQueueSource::new(&config.error_queue.path)))?;

    registry.register_worker(Arc::new(MagicWorker::new()))?;
    registry.register_worker(Arc::new(StringsWorker::new()))?;
    registry.register_worker(Arc::new(CarveWorker::new()))?;

    registry.register_output(Arc::new(StdoutConnector::new(template_from_config(
        &config.output.template,
    ))))?;
    registry.register_output(Arc::new(FileConnector::new(&config.output.outfile)))?;

    registry.register_archive(Arc::new(DirArchive::new(&config.output.archive_dir)))?;

    tracing::debug!(plugins = registry.count(), "built-in plugins registered");
    Ok(registry)
}

/// 실행할 소스 플러그인 이름을 결정합니다.
///
/// 에러 큐 재처리가 켜져 있으면 `ingest.source`보다 우선합니다.
pub fn source_name(config: &SifterConfig) -> &str {
    if config.ingest.process_errors {
        ERROR_QUEUE_SOURCE
    } else {
        &config.ingest.source
    }
}
