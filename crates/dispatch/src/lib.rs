#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`rule`]: YAML 디스패치 규칙 로딩과 내용 매칭
//! - [`guard`]: 재귀 깊이 제한
//! - [`rate_limit`]: `count/seconds` 고정 윈도우 레이트 리미터
//! - [`dispatcher`]: 대상 결정과 워커 동시 실행
//! - [`router`]: 결과 레코드 전달(combined/split)과 추출물 보관
//! - [`error_queue`]: 최종 실패 요청의 내구성 큐
//! - [`tagging`]: 수집 시점 TLP/메타데이터 태깅
//! - [`engine`]: 소스 구동, lineage 작업 큐, 라우팅, 에러 채널 연결
//! - [`config`]: 엔진 설정 (core 설정에서 파생)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Source -> Tagger -> Dispatcher -> ResultRouter -> Connectors
//!                      |    |    \          \
//!              RuleMatcher  |  RateLimiter   ArchiveConnector
//!                    RecursionGuard
//!              (실패 시) -> ErrorChannel
//! ```

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod error_queue;
pub mod guard;
pub mod rate_limit;
pub mod router;
pub mod rule;
pub mod tagging;

// --- 주요 타입 re-export ---

// 엔진
pub use engine::{Engine, EngineBuilder, RunStats};

// 설정
pub use config::{EngineConfig, EngineConfigBuilder, NoMatchPolicy};

// 에러
pub use error::DispatchError;

// 디스패치
pub use dispatcher::{Dispatch, Dispatcher};
pub use guard::RecursionGuard;
pub use rate_limit::{RateLimit, RateLimiter};

// 규칙
pub use rule::{DispatchRule, RuleLoader, RuleMatcher};

// 라우팅
pub use router::{ResultRouter, RouteReport};

// 에러 채널
pub use error_queue::{
    ErrorChannel, ErrorEntry, ErrorQueue, FailureReason, JsonlErrorQueue, MemoryErrorQueue,
};

// 태깅
pub use tagging::Tagger;
