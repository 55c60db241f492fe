//! 설정 관리 -- sifter.toml 파싱 및 런타임 설정
//!
//! [`SifterConfig`]는 모든 구성요소의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SIFTER_DISPATCH_MAX_RECURSION=2` 형식)
//! 3. 설정 파일 (`sifter.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), sifter_core::error::SifterError> {
//! use sifter_core::config::SifterConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = SifterConfig::load("sifter.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = SifterConfig::parse("[dispatch]\nmax_recursion = 1")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, SifterError};
use crate::types::Tlp;

/// 플러그인 동시 실행 수 상한
pub const MAX_PROCESSES_LIMIT: usize = 1024;

/// 유효한 로그 레벨
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// 유효한 로그 포맷
const VALID_LOG_FORMATS: &[&str] = &["json", "pretty"];

/// 유효한 no-match 정책
const VALID_NO_MATCH_POLICIES: &[&str] = &["error", "drop", "default"];

/// 출력 커넥터 레코드 인코딩
const VALID_TEMPLATES: &[&str] = &["json", "compact"];

/// Sifter 통합 설정
///
/// `sifter.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SifterConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 디스패치 설정
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// 출력 설정
    #[serde(default)]
    pub output: OutputConfig,
    /// 수집 설정
    #[serde(default)]
    pub ingest: IngestConfig,
    /// 에러 큐 설정
    #[serde(default)]
    pub error_queue: ErrorQueueConfig,
}

impl SifterConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SifterError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SifterError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SifterError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                SifterError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, SifterError> {
        toml::from_str(toml_str).map_err(|e| {
            SifterError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `SIFTER_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SIFTER_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SIFTER_GENERAL_LOG_FORMAT");

        // Dispatch
        override_bool(
            &mut self.dispatch.auto_dispatch,
            "SIFTER_DISPATCH_AUTO_DISPATCH",
        );
        override_string(&mut self.dispatch.rules_path, "SIFTER_DISPATCH_RULES_PATH");
        override_csv(&mut self.dispatch.workers, "SIFTER_DISPATCH_WORKERS");
        override_u32(
            &mut self.dispatch.max_recursion,
            "SIFTER_DISPATCH_MAX_RECURSION",
        );
        override_usize(
            &mut self.dispatch.max_processes,
            "SIFTER_DISPATCH_MAX_PROCESSES",
        );
        override_string(&mut self.dispatch.rate_limit, "SIFTER_DISPATCH_RATE_LIMIT");
        override_string(
            &mut self.dispatch.no_match_policy,
            "SIFTER_DISPATCH_NO_MATCH_POLICY",
        );
        override_string(
            &mut self.dispatch.default_plugin,
            "SIFTER_DISPATCH_DEFAULT_PLUGIN",
        );
        override_u64(
            &mut self.dispatch.plugin_timeout_secs,
            "SIFTER_DISPATCH_PLUGIN_TIMEOUT_SECS",
        );

        // Output
        override_csv(&mut self.output.connectors, "SIFTER_OUTPUT_CONNECTORS");
        override_string(&mut self.output.archive, "SIFTER_OUTPUT_ARCHIVE");
        override_bool(&mut self.output.split, "SIFTER_OUTPUT_SPLIT");
        override_string(&mut self.output.template, "SIFTER_OUTPUT_TEMPLATE");
        override_string(&mut self.output.outfile, "SIFTER_OUTPUT_OUTFILE");
        override_string(&mut self.output.archive_dir, "SIFTER_OUTPUT_ARCHIVE_DIR");

        // Ingest
        override_string(&mut self.ingest.source, "SIFTER_INGEST_SOURCE");
        override_string(&mut self.ingest.path, "SIFTER_INGEST_PATH");
        override_bool(
            &mut self.ingest.process_errors,
            "SIFTER_INGEST_PROCESS_ERRORS",
        );
        override_string(&mut self.ingest.tlp, "SIFTER_INGEST_TLP");
        override_csv(&mut self.ingest.metadata, "SIFTER_INGEST_METADATA");

        // Error queue
        override_bool(&mut self.error_queue.enabled, "SIFTER_ERROR_QUEUE_ENABLED");
        override_string(&mut self.error_queue.path, "SIFTER_ERROR_QUEUE_PATH");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 레이트 리밋 문자열과 메타데이터 쌍은 디스패치 엔진 구성 시점에
    /// 각각의 전용 에러로 검증됩니다.
    pub fn validate(&self) -> Result<(), SifterError> {
        check_one_of(
            "general.log_level",
            &self.general.log_level,
            VALID_LOG_LEVELS,
        )?;
        check_one_of(
            "general.log_format",
            &self.general.log_format,
            VALID_LOG_FORMATS,
        )?;

        if self.dispatch.max_processes == 0 || self.dispatch.max_processes > MAX_PROCESSES_LIMIT {
            return Err(invalid(
                "dispatch.max_processes",
                format!("must be between 1 and {MAX_PROCESSES_LIMIT}"),
            ));
        }

        check_one_of(
            "dispatch.no_match_policy",
            &self.dispatch.no_match_policy,
            VALID_NO_MATCH_POLICIES,
        )?;
        if self.dispatch.no_match_policy == "default" && self.dispatch.default_plugin.is_empty() {
            return Err(invalid(
                "dispatch.default_plugin",
                "must be set when no_match_policy is 'default'",
            ));
        }

        if self.output.connectors.is_empty() {
            return Err(invalid(
                "output.connectors",
                "at least one output connector is required",
            ));
        }
        if self.output.connectors.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid(
                "output.connectors",
                "connector names must not be empty",
            ));
        }
        check_one_of("output.template", &self.output.template, VALID_TEMPLATES)?;

        if self.ingest.source.is_empty() {
            return Err(invalid("ingest.source", "source plugin name is required"));
        }
        if !self.ingest.tlp.is_empty() && self.ingest.tlp.parse::<Tlp>().is_err() {
            return Err(invalid(
                "ingest.tlp",
                "must be one of: white, green, amber, red",
            ));
        }

        if (self.error_queue.enabled || self.ingest.process_errors)
            && self.error_queue.path.is_empty()
        {
            return Err(invalid(
                "error_queue.path",
                "must be set when the error queue is used",
            ));
        }

        Ok(())
    }

    /// 설정된 기본 TLP 분류를 반환합니다 (미설정 시 `None`).
    pub fn default_tlp(&self) -> Option<Tlp> {
        if self.ingest.tlp.is_empty() {
            None
        } else {
            self.ingest.tlp.parse().ok()
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> SifterError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

fn check_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), SifterError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ))
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 디스패치 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 규칙 기반 자동 디스패치 활성화
    pub auto_dispatch: bool,
    /// 디스패치 규칙 경로 (파일 또는 디렉토리)
    pub rules_path: String,
    /// 명시적 워커 목록 (자동 디스패치 결과가 없을 때 사용)
    pub workers: Vec<String>,
    /// 최대 재귀 깊이 (0이면 최상위 페이로드만 처리)
    pub max_recursion: u32,
    /// 플러그인 동시 실행 수
    pub max_processes: usize,
    /// 레이트 리밋 (`count/seconds`, 빈 문자열이면 비활성)
    pub rate_limit: String,
    /// 대상 플러그인이 없을 때의 정책 (error, drop, default)
    pub no_match_policy: String,
    /// `default` 정책에서 사용할 플러그인
    pub default_plugin: String,
    /// 플러그인 실행 시간 제한 (초, 0이면 무제한)
    pub plugin_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            auto_dispatch: false,
            rules_path: String::new(),
            workers: Vec::new(),
            max_recursion: 3,
            max_processes: 4,
            rate_limit: String::new(),
            no_match_policy: "error".to_owned(),
            default_plugin: String::new(),
            plugin_timeout_secs: 0,
        }
    }
}

/// 출력 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 출력 커넥터 이름 목록
    pub connectors: Vec<String>,
    /// 보관 커넥터 이름 (빈 문자열이면 보관하지 않음)
    pub archive: String,
    /// 플러그인 결과를 개별 레코드로 분리 출력
    pub split: bool,
    /// 레코드 인코딩 (json, compact)
    pub template: String,
    /// `file` 커넥터 출력 경로
    pub outfile: String,
    /// `dir` 보관 커넥터 저장 디렉토리
    pub archive_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            connectors: vec!["stdout".to_owned()],
            archive: String::new(),
            split: false,
            template: "json".to_owned(),
            outfile: "sifter-results.jsonl".to_owned(),
            archive_dir: "sifter-archive".to_owned(),
        }
    }
}

/// 수집 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 소스 플러그인 이름
    pub source: String,
    /// 수집 경로 (파일 또는 디렉토리)
    pub path: String,
    /// 에러 큐를 재처리 대상으로 사용
    pub process_errors: bool,
    /// 기본 TLP 분류 (빈 문자열이면 미지정)
    pub tlp: String,
    /// `key:value` 메타데이터 목록
    pub metadata: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: "file".to_owned(),
            path: String::new(),
            process_errors: false,
            tlp: String::new(),
            metadata: Vec::new(),
        }
    }
}

/// 에러 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorQueueConfig {
    /// 최종 실패 요청을 에러 큐에 기록
    pub enabled: bool,
    /// 에러 큐 파일 경로 (JSON Lines)
    pub path: String,
}

impl Default for ErrorQueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "sifter-errors.jsonl".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
