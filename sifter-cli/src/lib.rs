//! # sifter-cli
//!
//! `sifter` 바이너리의 구성요소입니다.
//!
//! - [`cli`]: clap 인자 정의와 설정 오버라이드
//! - [`builtin`]: 내장 소스/워커/커넥터 플러그인
//! - [`runner`]: 설정 로딩과 엔진 실행
//! - [`output`]: 실행 요약과 플러그인 목록 출력
//! - [`logging`]: tracing 초기화
//! - [`error`]: CLI 에러와 종료 코드

pub mod builtin;
pub mod cli;
pub mod error;
pub mod logging;
pub mod output;
pub mod runner;
