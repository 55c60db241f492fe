//! 디스패치 엔진 설정
//!
//! [`EngineConfig`]는 core의 [`SifterConfig`]에서 파생되는 타입 있는 런타임 설정입니다.
//! 문자열 설정(레이트 리밋, no-match 정책, TLP, 메타데이터)은 여기서 한 번만
//! 파싱/검증되므로 잘못된 설정은 시작 시점에 실패합니다.
//!
//! # 사용 예시
//! ```ignore
//! use sifter_core::config::SifterConfig;
//! use sifter_dispatch::config::EngineConfig;
//!
//! let core_config = SifterConfig::default();
//! let config = EngineConfig::from_core(&core_config)?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use sifter_core::config::{MAX_PROCESSES_LIMIT, SifterConfig};
use sifter_core::types::{DeliveryMode, Tlp};

use crate::error::DispatchError;
use crate::rate_limit::RateLimit;
use crate::tagging;

/// 소스 → 엔진 채널 기본 용량
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// 대상 플러그인을 결정하지 못했을 때의 정책
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NoMatchPolicy {
    /// `NoPluginMatched` 에러로 실패 (기본값)
    #[default]
    Error,
    /// 결과 없이 조용히 버림
    Drop,
    /// 지정된 기본 플러그인으로 디스패치
    Default(String),
}

impl NoMatchPolicy {
    /// 설정 문자열에서 정책을 생성합니다.
    pub fn parse(policy: &str, default_plugin: &str) -> Result<Self, DispatchError> {
        match policy {
            "error" => Ok(Self::Error),
            "drop" => Ok(Self::Drop),
            "default" if !default_plugin.is_empty() => Ok(Self::Default(default_plugin.to_owned())),
            "default" => Err(DispatchError::Config {
                field: "dispatch.default_plugin".to_owned(),
                reason: "must be set when no_match_policy is 'default'".to_owned(),
            }),
            other => Err(DispatchError::Config {
                field: "dispatch.no_match_policy".to_owned(),
                reason: format!("unknown policy '{other}', expected error, drop or default"),
            }),
        }
    }
}

/// 디스패치 엔진 설정
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 규칙 기반 자동 디스패치 활성화
    pub auto_dispatch: bool,
    /// 규칙 경로
    pub rules_path: Option<PathBuf>,
    /// 명시적 워커 목록
    pub workers: Vec<String>,
    /// 최대 재귀 깊이
    pub max_recursion: u32,
    /// 플러그인 동시 실행 수 및 동시 처리 lineage 수
    pub max_processes: usize,
    /// 레이트 리밋 (없으면 무제한)
    pub rate_limit: Option<RateLimit>,
    /// 대상이 없을 때의 정책
    pub no_match_policy: NoMatchPolicy,
    /// 플러그인 실행 시간 제한
    pub plugin_timeout: Option<Duration>,
    /// 출력 커넥터 이름
    pub output_connectors: Vec<String>,
    /// 보관 커넥터 이름
    pub archive_connector: Option<String>,
    /// 결과 전달 방식
    pub delivery: DeliveryMode,
    /// 최종 실패를 에러 큐에 기록
    pub error_queue: bool,
    /// 에러 큐 파일 경로
    pub error_queue_path: PathBuf,
    /// 수집 시 부여할 TLP
    pub tlp: Option<Tlp>,
    /// 수집 시 부여할 `key:value` 메타데이터
    pub metadata: Vec<String>,
    /// 소스 → 엔진 채널 용량
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_dispatch: false,
            rules_path: None,
            workers: Vec::new(),
            max_recursion: 3,
            max_processes: 4,
            rate_limit: None,
            no_match_policy: NoMatchPolicy::Error,
            plugin_timeout: None,
            output_connectors: vec!["stdout".to_owned()],
            archive_connector: None,
            delivery: DeliveryMode::Combined,
            error_queue: false,
            error_queue_path: PathBuf::from("sifter-errors.jsonl"),
            tlp: None,
            metadata: Vec::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// core 설정에서 엔진 설정을 생성합니다.
    ///
    /// # Errors
    /// - 레이트 리밋 형식 오류: `InvalidRateLimit`
    /// - 메타데이터 형식 오류: `InvalidMetadataFormat`
    /// - 그 밖의 잘못된 값: `Config`
    pub fn from_core(core: &SifterConfig) -> Result<Self, DispatchError> {
        let dispatch = &core.dispatch;

        let rate_limit = if dispatch.rate_limit.trim().is_empty() {
            None
        } else {
            Some(dispatch.rate_limit.parse::<RateLimit>()?)
        };

        let tlp = if core.ingest.tlp.is_empty() {
            None
        } else {
            Some(
                core.ingest
                    .tlp
                    .parse::<Tlp>()
                    .map_err(|reason| DispatchError::Config {
                        field: "ingest.tlp".to_owned(),
                        reason,
                    })?,
            )
        };

        let config = Self {
            auto_dispatch: dispatch.auto_dispatch,
            rules_path: non_empty(&dispatch.rules_path).map(PathBuf::from),
            workers: dispatch.workers.clone(),
            max_recursion: dispatch.max_recursion,
            max_processes: dispatch.max_processes,
            rate_limit,
            no_match_policy: NoMatchPolicy::parse(
                &dispatch.no_match_policy,
                &dispatch.default_plugin,
            )?,
            plugin_timeout: (dispatch.plugin_timeout_secs > 0)
                .then(|| Duration::from_secs(dispatch.plugin_timeout_secs)),
            output_connectors: core.output.connectors.clone(),
            archive_connector: non_empty(&core.output.archive).map(str::to_owned),
            delivery: if core.output.split {
                DeliveryMode::Split
            } else {
                DeliveryMode::Combined
            },
            // 재처리 중 다시 실패한 요청은 큐에 되돌려야 함
            error_queue: core.error_queue.enabled || core.ingest.process_errors,
            error_queue_path: PathBuf::from(&core.error_queue.path),
            tlp,
            metadata: core.ingest.metadata.clone(),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_processes == 0 || self.max_processes > MAX_PROCESSES_LIMIT {
            return Err(DispatchError::Config {
                field: "max_processes".to_owned(),
                reason: format!("must be 1-{MAX_PROCESSES_LIMIT}"),
            });
        }

        if self.channel_capacity == 0 {
            return Err(DispatchError::Config {
                field: "channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.output_connectors.is_empty() {
            return Err(DispatchError::Config {
                field: "output_connectors".to_owned(),
                reason: "at least one output connector is required".to_owned(),
            });
        }

        if self.auto_dispatch && self.rules_path.is_none() && self.workers.is_empty() {
            tracing::debug!("auto dispatch enabled without rules path, relying on plugin rules");
        }

        tagging::parse_metadata(&self.metadata)?;

        Ok(())
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// 엔진 설정 빌더
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_dispatch(mut self, enabled: bool) -> Self {
        self.config.auto_dispatch = enabled;
        self
    }

    pub fn rules_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rules_path = Some(path.into());
        self
    }

    pub fn workers(mut self, workers: Vec<String>) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn max_recursion(mut self, depth: u32) -> Self {
        self.config.max_recursion = depth;
        self
    }

    pub fn max_processes(mut self, count: usize) -> Self {
        self.config.max_processes = count;
        self
    }

    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.config.rate_limit = Some(limit);
        self
    }

    pub fn no_match_policy(mut self, policy: NoMatchPolicy) -> Self {
        self.config.no_match_policy = policy;
        self
    }

    pub fn plugin_timeout(mut self, timeout: Duration) -> Self {
        self.config.plugin_timeout = Some(timeout);
        self
    }

    pub fn output_connectors(mut self, connectors: Vec<String>) -> Self {
        self.config.output_connectors = connectors;
        self
    }

    pub fn archive_connector(mut self, name: impl Into<String>) -> Self {
        self.config.archive_connector = Some(name.into());
        self
    }

    pub fn delivery(mut self, mode: DeliveryMode) -> Self {
        self.config.delivery = mode;
        self
    }

    pub fn error_queue(mut self, enabled: bool) -> Self {
        self.config.error_queue = enabled;
        self
    }

    pub fn tlp(mut self, tlp: Tlp) -> Self {
        self.config.tlp = Some(tlp);
        self
    }

    pub fn metadata(mut self, pairs: Vec<String>) -> Self {
        self.config.metadata = pairs;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// 설정을 검증하고 `EngineConfig`를 생성합니다.
    pub fn build(self) -> Result<EngineConfig, DispatchError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
