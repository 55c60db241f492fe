//! 디스패치 에러 타입
//!
//! [`DispatchError`]는 규칙 로딩부터 라우팅, 에러 큐까지 디스패치 파이프라인
//! 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<DispatchError> for SifterError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use std::time::Duration;

use sifter_core::error::{ConfigError, PluginError, SifterError};

/// 디스패치 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// 규칙 파일 로딩 실패 (읽기/파싱/중복 ID)
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 규칙 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 규칙 유효성 검증 실패 (패턴 컴파일 실패 포함)
    #[error("rule validation error: rule '{rule_id}': {reason}")]
    RuleValidation {
        /// 문제가 된 규칙 ID
        rule_id: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 레이트 리밋 초과
    #[error("rate limit exceeded, retry after {}ms", retry_after.as_millis())]
    RateLimitExceeded {
        /// 현재 윈도우가 끝날 때까지 남은 시간
        retry_after: Duration,
    },

    /// 대상 플러그인을 결정할 수 없음
    #[error("no plugin matched payload {payload_id}")]
    NoPluginMatched { payload_id: String },

    /// 재귀 깊이 상한 초과
    #[error("recursion limit reached: depth {depth} > max {max}")]
    RecursionLimitReached { depth: u32, max: u32 },

    /// `key:value` 형식이 아닌 메타데이터
    #[error("invalid metadata format '{0}', expected key:value")]
    InvalidMetadataFormat(String),

    /// `count/seconds` 형식이 아닌 레이트 리밋
    #[error("invalid rate limit '{0}', expected count/seconds with both values > 0")]
    InvalidRateLimit(String),

    /// 출력/보관 커넥터 에러
    #[error("connector error: {connector}: {reason}")]
    Connector {
        /// 커넥터 이름
        connector: String,
        /// 에러 사유
        reason: String,
    },

    /// 에러 큐 기록/읽기 실패
    #[error("error queue failure: {0}")]
    ErrorQueue(String),

    /// 엔진 내부 태스크 실패 (패닉 등)
    #[error("task failed: {0}")]
    Task(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 플러그인 에러
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<DispatchError> for SifterError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Config { field, reason } => {
                SifterError::Config(ConfigError::InvalidValue { field, reason })
            }
            DispatchError::Plugin(e) => SifterError::Plugin(e),
            DispatchError::Io(e) => SifterError::Io(e),
            other => SifterError::Dispatch(other.to_string()),
        }
    }
}
