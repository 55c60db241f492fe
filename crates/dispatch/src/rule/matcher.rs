//! 패턴 컴파일 및 매칭 로직
//!
//! [`CompiledRule`]은 규칙의 모든 패턴을 로딩 시 한 번만 바이트 정규식으로
//! 컴파일해 두고, 매칭 시에는 재컴파일 없이 페이로드 내용에 적용합니다.

use regex::bytes::{Regex, RegexBuilder};

use super::types::{ContentPattern, DispatchRule, MatchMode, PatternModifier};
use crate::error::DispatchError;

/// 컴파일된 규칙
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule_id: String,
    plugins: Vec<String>,
    mode: MatchMode,
    patterns: Vec<Regex>,
}

impl CompiledRule {
    /// 규칙의 패턴을 컴파일합니다.
    ///
    /// # Errors
    /// 정규식 문법 오류나 잘못된 16진수 문자열은 `RuleValidation` 에러가 됩니다.
    pub fn compile(rule: &DispatchRule) -> Result<Self, DispatchError> {
        let patterns = rule
            .patterns
            .iter()
            .enumerate()
            .map(|(idx, pattern)| {
                compile_pattern(pattern).map_err(|reason| DispatchError::RuleValidation {
                    rule_id: rule.id.clone(),
                    reason: format!("invalid pattern[{idx}] ({:?}): {reason}", pattern.modifier),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rule_id: rule.id.clone(),
            plugins: rule.plugins.clone(),
            mode: rule.match_mode,
            patterns,
        })
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    /// 매칭 시 디스패치할 플러그인 이름
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    /// 페이로드 내용이 규칙에 매칭되는지 평가합니다.
    pub fn is_match(&self, content: &[u8]) -> bool {
        match self.mode {
            MatchMode::Any => self.patterns.iter().any(|re| re.is_match(content)),
            MatchMode::All => self.patterns.iter().all(|re| re.is_match(content)),
        }
    }
}

/// 패턴 하나를 바이트 정규식으로 변환합니다.
fn compile_pattern(pattern: &ContentPattern) -> Result<Regex, String> {
    let (source, unicode) = match pattern.modifier {
        PatternModifier::Contains => (regex::escape(&pattern.value), true),
        PatternModifier::StartsWith => (format!(r"\A(?:{})", regex::escape(&pattern.value)), true),
        // 임의 바이트(0x80 이상)를 그대로 매칭하려면 유니코드 모드를 꺼야 합니다.
        // `\xFF`는 바이트 0xFF, `.`은 UTF-8이 아닌 바이트에도 매칭됩니다.
        PatternModifier::Regex => (pattern.value.clone(), false),
        PatternModifier::Hex => (hex_to_pattern(&pattern.value)?, false),
    };

    RegexBuilder::new(&source)
        .case_insensitive(pattern.nocase)
        .unicode(unicode)
        .build()
        .map_err(|e| e.to_string())
}

/// `"25 50 44 46"` 또는 `"25504446"` 형식의 16진수 문자열을 바이트 리터럴 패턴으로 변환합니다.
fn hex_to_pattern(value: &str) -> Result<String, String> {
    let digits: Vec<char> = value.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() {
        return Err("hex pattern must not be empty".to_owned());
    }
    if digits.len() % 2 != 0 {
        return Err(format!(
            "hex pattern must have an even number of digits, got {}",
            digits.len()
        ));
    }

    let mut source = String::with_capacity(digits.len() * 2);
    for pair in digits.chunks(2) {
        if !pair.iter().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "invalid hex byte '{}{}'",
                pair[0], pair[1]
            ));
        }
        source.push_str(r"\x");
        source.push(pair[0]);
        source.push(pair[1]);
    }
    Ok(source)
}
