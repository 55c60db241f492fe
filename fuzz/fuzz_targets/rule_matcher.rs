#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use sifter_core::types::Payload;
use sifter_dispatch::rule::{
    ContentPattern, DispatchRule, MatchMode, PatternModifier, RuleMatcher, RuleStatus,
};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 패턴 목록 (최대 8개로 제한)
    patterns: Vec<FuzzPattern>,
    match_all: bool,
    /// 매칭 대상 페이로드 내용
    content: Vec<u8>,
}

#[derive(Arbitrary, Debug)]
struct FuzzPattern {
    modifier: FuzzModifier,
    value: String,
    nocase: bool,
}

#[derive(Arbitrary, Debug)]
enum FuzzModifier {
    Contains,
    StartsWith,
    Regex,
    Hex,
}

impl FuzzModifier {
    fn to_pattern_modifier(&self) -> PatternModifier {
        match self {
            FuzzModifier::Contains => PatternModifier::Contains,
            FuzzModifier::StartsWith => PatternModifier::StartsWith,
            FuzzModifier::Regex => PatternModifier::Regex,
            FuzzModifier::Hex => PatternModifier::Hex,
        }
    }
}

fuzz_target!(|input: FuzzInput| {
    let patterns: Vec<ContentPattern> = input
        .patterns
        .iter()
        .take(8)
        .map(|p| ContentPattern {
            modifier: p.modifier.to_pattern_modifier(),
            value: p.value.clone(),
            nocase: p.nocase,
        })
        .collect();

    let rule = DispatchRule {
        id: "fuzz_rule".to_owned(),
        title: "Fuzz Rule".to_owned(),
        description: String::new(),
        plugins: vec!["fuzz".to_owned()],
        status: RuleStatus::Enabled,
        match_mode: if input.match_all {
            MatchMode::All
        } else {
            MatchMode::Any
        },
        patterns,
        tags: Vec::new(),
    };

    let mut matcher = RuleMatcher::new().with_enabled(true);

    // 잘못된 패턴은 에러로 거부되어야 하며 크래시하면 안 됨
    if matcher.add_rule(rule).is_err() {
        return;
    }

    let payload = Payload::new(input.content, None);
    let matched = matcher.match_payload(&payload);
    assert!(matched.is_empty() || matched.contains("fuzz"));
});
