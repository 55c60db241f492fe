//! 디스패치 규칙 엔진 -- 내용 기반 플러그인 선택
//!
//! YAML 규칙을 로드하여 [`Payload`] 내용에 대한 패턴 매칭을 수행하고,
//! 매칭된 규칙들이 지정한 플러그인 이름의 합집합을 반환합니다.
//!
//! # 규칙 형식
//! ```yaml
//! id: pdf_document
//! title: PDF document
//! plugins: [pdf]
//! patterns:
//!   - modifier: starts_with
//!     value: "%PDF-"
//! ```
//!
//! # 아키텍처
//! - [`RuleMatcher`]: 규칙 관리 및 매칭 코디네이터
//! - [`loader`]: YAML 파일 로딩 및 유효성 검증
//! - [`matcher`]: 패턴 컴파일 및 평가 (contains, starts_with, regex, hex)
//! - [`types`]: 규칙 데이터 구조 정의

pub mod loader;
pub mod matcher;
pub mod types;

pub use loader::RuleLoader;
pub use matcher::CompiledRule;
pub use types::{ContentPattern, DispatchRule, MatchMode, PatternModifier, RuleStatus};

use std::collections::BTreeSet;
use std::path::Path;

use sifter_core::plugin::DynWorker;
use sifter_core::types::Payload;

use crate::error::DispatchError;

/// 규칙 매처 -- 디스패치 규칙 관리 및 매칭 코디네이터
///
/// 시작 시점에 규칙을 로드하고 나면 읽기 전용으로 공유됩니다.
/// [`RuleMatcher::match_payload`]는 부수 효과가 없습니다.
///
/// # 사용 예시
/// ```ignore
/// let mut matcher = RuleMatcher::new();
/// matcher.load_path("/etc/sifter/rules").await?;
///
/// let plugins = matcher.match_payload(&payload);
/// ```
pub struct RuleMatcher {
    /// 로드된 규칙 (로드 순서 유지)
    rules: Vec<DispatchRule>,
    /// 활성 규칙의 컴파일 결과
    compiled: Vec<CompiledRule>,
    /// 자동 디스패치 활성화 여부
    enabled: bool,
}

impl RuleMatcher {
    /// 새 매처를 생성합니다.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            compiled: Vec::new(),
            enabled: true,
        }
    }

    /// 자동 디스패치 활성화 여부를 설정합니다.
    ///
    /// 비활성화된 매처는 규칙과 관계없이 항상 빈 집합을 반환합니다.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 파일 또는 디렉토리에서 규칙을 로드합니다.
    pub async fn load_path(&mut self, path: impl AsRef<Path>) -> Result<usize, DispatchError> {
        let rules = RuleLoader::load_path(path).await?;
        self.add_rules(rules)
    }

    /// 워커 플러그인이 선언한 규칙을 추가합니다.
    pub fn load_worker_rules(&mut self, worker: &dyn DynWorker) -> Result<usize, DispatchError> {
        let Some(yaml) = worker.dispatch_rules() else {
            return Ok(0);
        };
        let rules = RuleLoader::parse_yaml(yaml, &format!("plugin:{}", worker.name()))?;
        let count = self.add_rules(rules)?;
        tracing::debug!(plugin = worker.name(), count, "loaded plugin dispatch rules");
        Ok(count)
    }

    /// 규칙 여러 개를 추가합니다. 하나라도 실패하면 아무것도 추가하지 않습니다.
    pub fn add_rules(&mut self, rules: Vec<DispatchRule>) -> Result<usize, DispatchError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in &rules {
            rule.validate()?;
            if self.rules.iter().any(|r| r.id == rule.id) {
                return Err(DispatchError::RuleLoad {
                    path: rule.id.clone(),
                    reason: format!("duplicate rule id '{}'", rule.id),
                });
            }
            compiled.push(CompiledRule::compile(rule)?);
        }
        RuleLoader::check_unique_ids(&rules, "(batch)")?;

        let count = rules.len();
        for (rule, compiled_rule) in rules.into_iter().zip(compiled) {
            if rule.is_enabled() {
                self.compiled.push(compiled_rule);
            }
            self.rules.push(rule);
        }
        Ok(count)
    }

    /// 단일 규칙을 추가합니다.
    pub fn add_rule(&mut self, rule: DispatchRule) -> Result<(), DispatchError> {
        self.add_rules(vec![rule]).map(|_| ())
    }

    /// 규칙을 제거합니다.
    pub fn remove_rule(&mut self, rule_id: &str) -> Option<DispatchRule> {
        self.compiled.retain(|c| c.rule_id() != rule_id);
        let idx = self.rules.iter().position(|r| r.id == rule_id)?;
        Some(self.rules.remove(idx))
    }

    /// 현재 로드된 규칙 수를 반환합니다 (비활성 규칙 포함).
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 로드된 규칙 목록
    pub fn rules(&self) -> &[DispatchRule] {
        &self.rules
    }

    /// 페이로드에 매칭되는 모든 활성 규칙의 플러그인 이름 합집합을 반환합니다.
    ///
    /// 자동 디스패치가 꺼져 있거나 매칭되는 규칙이 없으면 빈 집합입니다.
    pub fn match_payload(&self, payload: &Payload) -> BTreeSet<String> {
        if !self.enabled {
            return BTreeSet::new();
        }

        let content = payload.content();
        let mut plugins = BTreeSet::new();
        for rule in &self.compiled {
            if rule.is_match(content) {
                tracing::trace!(
                    rule_id = rule.rule_id(),
                    payload_id = payload.id(),
                    "dispatch rule matched"
                );
                plugins.extend(rule.plugins().iter().cloned());
            }
        }
        plugins
    }
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sifter_core::error::PluginError;
    use sifter_core::plugin::{Plugin, PluginInfo, PluginType, WorkerPlugin};
    use sifter_core::types::WorkerOutput;

    fn rule(id: &str, plugins: &[&str], modifier: PatternModifier, value: &str) -> DispatchRule {
        DispatchRule {
            id: id.to_owned(),
            title: id.to_owned(),
            description: String::new(),
            plugins: plugins.iter().map(|p| (*p).to_owned()).collect(),
            status: RuleStatus::Enabled,
            match_mode: MatchMode::Any,
            patterns: vec![ContentPattern::new(modifier, value)],
            tags: vec![],
        }
    }

    fn matcher_with(rules: Vec<DispatchRule>) -> RuleMatcher {
        let mut matcher = RuleMatcher::new();
        matcher.add_rules(rules).unwrap();
        matcher
    }

    #[test]
    fn pdf_magic_selects_pdf_plugin() {
        let matcher = matcher_with(vec![rule(
            "pdf",
            &["pdf"],
            PatternModifier::StartsWith,
            "%PDF-",
        )]);
        let payload = Payload::new(&b"%PDF-1.7 ..."[..], None);
        let plugins = matcher.match_payload(&payload);
        assert_eq!(plugins.into_iter().collect::<Vec<_>>(), vec!["pdf"]);
    }

    #[test]
    fn returns_union_of_firing_rules() {
        let matcher = matcher_with(vec![
            rule("pe", &["pe", "strings"], PatternModifier::StartsWith, "MZ"),
            rule("url", &["strings", "iocs"], PatternModifier::Regex, "https?://"),
            rule("zip", &["unzip"], PatternModifier::Hex, "504B0304"),
        ]);
        let payload = Payload::new(&b"MZ... http://c2.example ..."[..], None);
        let plugins: Vec<String> = matcher.match_payload(&payload).into_iter().collect();
        assert_eq!(plugins, vec!["iocs", "pe", "strings"]);
    }

    #[test]
    fn nothing_fires_yields_empty_set() {
        let matcher = matcher_with(vec![rule(
            "pdf",
            &["pdf"],
            PatternModifier::StartsWith,
            "%PDF-",
        )]);
        let payload = Payload::new(&b"plain text"[..], None);
        assert!(matcher.match_payload(&payload).is_empty());
    }

    #[test]
    fn disabled_matcher_yields_empty_set() {
        let mut matcher = RuleMatcher::new().with_enabled(false);
        matcher
            .add_rule(rule("any", &["x"], PatternModifier::Contains, "a"))
            .unwrap();
        let payload = Payload::new(&b"aaaa"[..], None);
        assert!(matcher.match_payload(&payload).is_empty());
        assert!(!matcher.is_enabled());
    }

    #[test]
    fn disabled_rule_never_fires() {
        let mut disabled = rule("off", &["x"], PatternModifier::Contains, "a");
        disabled.status = RuleStatus::Disabled;
        let matcher = matcher_with(vec![disabled]);
        assert_eq!(matcher.rule_count(), 1);
        assert!(matcher.match_payload(&Payload::new(&b"a"[..], None)).is_empty());
    }

    #[test]
    fn duplicate_rule_id_is_rejected() {
        let mut matcher = matcher_with(vec![rule("r", &["a"], PatternModifier::Contains, "a")]);
        let err = matcher
            .add_rule(rule("r", &["b"], PatternModifier::Contains, "b"))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate rule id"));
        assert_eq!(matcher.rule_count(), 1);
    }

    #[test]
    fn failed_batch_adds_nothing() {
        let mut matcher = RuleMatcher::new();
        let err = matcher
            .add_rules(vec![
                rule("ok", &["a"], PatternModifier::Contains, "a"),
                rule("broken", &["b"], PatternModifier::Regex, "(unclosed"),
            ])
            .unwrap_err();
        assert!(matches!(err, DispatchError::RuleValidation { .. }));
        assert_eq!(matcher.rule_count(), 0);
    }

    #[test]
    fn remove_rule_stops_matching() {
        let mut matcher = matcher_with(vec![rule("pdf", &["pdf"], PatternModifier::Contains, "%PDF")]);
        let removed = matcher.remove_rule("pdf").unwrap();
        assert_eq!(removed.id, "pdf");
        assert!(matcher.match_payload(&Payload::new(&b"%PDF"[..], None)).is_empty());
        assert!(matcher.remove_rule("pdf").is_none());
    }

    #[test]
    fn matching_is_side_effect_free() {
        let matcher = matcher_with(vec![rule("pdf", &["pdf"], PatternModifier::Contains, "%PDF")]);
        let payload = Payload::new(&b"%PDF"[..], None);
        let first = matcher.match_payload(&payload);
        let second = matcher.match_payload(&payload);
        assert_eq!(first, second);
        assert_eq!(matcher.rule_count(), 1);
    }

    struct RuleDeclaringWorker {
        info: PluginInfo,
    }

    impl Plugin for RuleDeclaringWorker {
        fn info(&self) -> &PluginInfo {
            &self.info
        }
    }

    impl WorkerPlugin for RuleDeclaringWorker {
        fn dispatch_rules(&self) -> Option<&str> {
            Some(
                r#"
id: ole_document
title: OLE compound document
plugins: [ole]
patterns:
  - modifier: hex
    value: "D0 CF 11 E0"
"#,
            )
        }

        async fn run(&self, _payload: &Payload) -> Result<WorkerOutput, PluginError> {
            Ok(WorkerOutput::default())
        }
    }

    #[test]
    fn worker_declared_rules_are_loaded() {
        let worker = RuleDeclaringWorker {
            info: PluginInfo::new("ole", PluginType::Worker, "OLE parser"),
        };
        let mut matcher = RuleMatcher::new();
        assert_eq!(matcher.load_worker_rules(&worker).unwrap(), 1);

        let payload = Payload::new(vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1], None);
        assert!(matcher.match_payload(&payload).contains("ole"));
    }

    #[tokio::test]
    async fn load_path_compiles_rules() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("bad_regex.yml"),
            "id: bad\ntitle: Bad\nplugins: [x]\npatterns:\n  - modifier: regex\n    value: \"[\"\n",
        )
        .await
        .unwrap();

        let mut matcher = RuleMatcher::new();
        let err = matcher.load_path(dir.path()).await.unwrap_err();
        assert!(matches!(err, DispatchError::RuleValidation { .. }));
    }
}
