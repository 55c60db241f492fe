//! 디스패치 규칙 데이터 타입
//!
//! YAML 규칙 파일에서 역직렬화되는 구조체들을 정의합니다.

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// 규칙 ID 최대 길이
const MAX_RULE_ID_LEN: usize = 256;

/// 디스패치 규칙 -- 페이로드 내용이 패턴에 맞으면 대상 플러그인으로 보냅니다.
///
/// # YAML 스키마
/// ```yaml
/// id: pdf_document
/// title: PDF document
/// plugins: [pdf]
/// status: enabled
/// match: any
/// patterns:
///   - modifier: starts_with
///     value: "%PDF-"
///   - modifier: hex
///     value: "25 50 44 46"
///     nocase: false
/// tags: [document]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRule {
    /// 규칙 고유 ID (로드된 전체 규칙에서 유일해야 함)
    pub id: String,
    /// 규칙 제목
    pub title: String,
    /// 규칙 설명
    #[serde(default)]
    pub description: String,
    /// 매칭 시 디스패치할 워커 플러그인 이름
    pub plugins: Vec<String>,
    /// 규칙 상태
    #[serde(default)]
    pub status: RuleStatus,
    /// 패턴 결합 방식
    #[serde(rename = "match", default)]
    pub match_mode: MatchMode,
    /// 내용 패턴 목록
    pub patterns: Vec<ContentPattern>,
    /// 분류 태그
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DispatchRule {
    /// 규칙의 유효성을 검증합니다.
    ///
    /// 패턴 자체의 컴파일 가능 여부는 [`super::matcher::CompiledRule`]이 검증합니다.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.id.is_empty() {
            return Err(DispatchError::RuleValidation {
                rule_id: "(empty)".to_owned(),
                reason: "rule id must not be empty".to_owned(),
            });
        }

        if self.id.len() > MAX_RULE_ID_LEN {
            return Err(self.invalid(format!(
                "rule id must not exceed {MAX_RULE_ID_LEN} characters"
            )));
        }

        if self.title.is_empty() {
            return Err(self.invalid("rule title must not be empty"));
        }

        if self.plugins.is_empty() {
            return Err(self.invalid("rule must target at least one plugin"));
        }

        if self.plugins.iter().any(|p| p.trim().is_empty()) {
            return Err(self.invalid("plugin names must not be empty"));
        }

        if self.patterns.is_empty() {
            return Err(self.invalid("rule must define at least one pattern"));
        }

        if let Some(idx) = self.patterns.iter().position(|p| p.value.is_empty()) {
            return Err(self.invalid(format!("pattern[{idx}] value must not be empty")));
        }

        Ok(())
    }

    /// 규칙이 매칭에 참여하는지 여부
    pub fn is_enabled(&self) -> bool {
        self.status == RuleStatus::Enabled
    }

    fn invalid(&self, reason: impl Into<String>) -> DispatchError {
        DispatchError::RuleValidation {
            rule_id: self.id.clone(),
            reason: reason.into(),
        }
    }
}

/// 규칙 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// 활성화 (기본값)
    #[default]
    Enabled,
    /// 비활성화 (로드되지만 매칭하지 않음)
    Disabled,
}

/// 패턴 결합 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// 패턴 중 하나라도 매칭 (기본값)
    #[default]
    Any,
    /// 모든 패턴이 매칭
    All,
}

/// 내용 패턴
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPattern {
    /// 매칭 수정자
    #[serde(default)]
    pub modifier: PatternModifier,
    /// 매칭할 값 (hex 수정자는 16진수 문자열)
    pub value: String,
    /// 대소문자 무시
    #[serde(default)]
    pub nocase: bool,
}

impl ContentPattern {
    pub fn new(modifier: PatternModifier, value: impl Into<String>) -> Self {
        Self {
            modifier,
            value: value.into(),
            nocase: false,
        }
    }
}

/// 패턴 수정자 -- 매칭 방식을 결정합니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternModifier {
    /// 내용 어디서든 부분 문자열 포함 (기본값)
    #[default]
    Contains,
    /// 오프셋 0에서 시작 (매직 넘버 검사)
    StartsWith,
    /// 내용 어디서든 정규식 매칭
    Regex,
    /// 내용 어디서든 16진수 바이트열 포함
    Hex,
}
