//! 에러 타입 -- 도메인별 에러 정의

/// Sifter 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum SifterError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 플러그인 관련 에러
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// 디스패치 파이프라인 에러
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 플러그인 등록/호출 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// 동일한 이름의 플러그인이 이미 등록됨
    #[error("plugin already registered: {name}")]
    AlreadyRegistered { name: String },

    /// 플러그인을 찾을 수 없음
    #[error("plugin not found: {name}")]
    NotFound { name: String },

    /// 플러그인 실행 실패
    #[error("plugin '{name}' failed: {reason}")]
    Failed { name: String, reason: String },

    /// 플러그인 실행 시간 초과
    #[error("plugin '{name}' timed out after {secs}s")]
    Timeout { name: String, secs: u64 },

    /// 커넥터 저장 실패
    #[error("connector '{name}' rejected record: {reason}")]
    Delivery { name: String, reason: String },

    /// 소스 수집 실패
    #[error("source '{name}' failed: {reason}")]
    Ingest { name: String, reason: String },
}

impl PluginError {
    /// 실행 실패 에러를 생성합니다.
    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// 커넥터 저장 실패 에러를 생성합니다.
    pub fn delivery(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Delivery {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
