//! # sifter-core
//!
//! Sifter 워크스페이스의 공통 기반 크레이트입니다.
//!
//! - [`types`]: 페이로드, 플러그인 결과, 출력 레코드 등 도메인 타입
//! - [`plugin`]: 소스/워커/커넥터 플러그인 계약과 이름 기반 레지스트리
//! - [`config`]: `sifter.toml` 설정 로딩 및 검증
//! - [`error`]: 공통 에러 타입
//! - [`metrics`]: 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, PluginError, SifterError};

// 설정
pub use config::{
    DispatchConfig, ErrorQueueConfig, GeneralConfig, IngestConfig, OutputConfig, SifterConfig,
};

// 플러그인
pub use plugin::{
    ArchiveConnector, BoxFuture, DynArchive, DynOutput, DynSource, DynWorker, OutputConnector,
    Plugin, PluginInfo, PluginRegistry, PluginType, SourcePlugin, WorkerPlugin,
};

// 도메인 타입
pub use types::{
    ArchiveMetadata, DeliveryMode, Extracted, ExtractedPayload, Payload, PayloadMeta,
    PluginOutcome, PluginResult, ProcessingRequest, ResultRecord, SkipReason, Tlp, WorkerOutput,
};
