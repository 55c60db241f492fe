//! 태깅 레이어 -- 수집 시점의 TLP 분류와 `key:value` 메타데이터 부착
//!
//! 태깅은 순수 함수입니다. 입력 페이로드는 그대로 두고 새 페이로드를 반환하며,
//! 같은 입력으로 여러 번 적용해도 결과가 같습니다.

use sifter_core::types::{Payload, Tlp};

use crate::error::DispatchError;

/// TLP 태그 접두어
const TLP_TAG_PREFIX: &str = "tlp:";

/// `key:value` 문자열 하나를 파싱합니다.
///
/// 첫 번째 `:`에서 나누므로 값에는 `:`가 포함될 수 있습니다.
/// 콜론이 없거나 key/value가 비어 있으면 `InvalidMetadataFormat`입니다.
pub fn parse_pair(raw: &str) -> Result<(String, String), DispatchError> {
    let (key, value) = raw
        .split_once(':')
        .ok_or_else(|| DispatchError::InvalidMetadataFormat(raw.to_owned()))?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        return Err(DispatchError::InvalidMetadataFormat(raw.to_owned()));
    }
    Ok((key.to_owned(), value.to_owned()))
}

/// `key:value` 목록을 모두 파싱합니다. 하나라도 잘못되면 실패합니다.
pub fn parse_metadata<S: AsRef<str>>(
    pairs: &[S],
) -> Result<Vec<(String, String)>, DispatchError> {
    pairs.iter().map(|p| parse_pair(p.as_ref())).collect()
}

/// 페이로드에 분류와 메타데이터를 부착한 새 페이로드를 반환합니다.
///
/// - `classification`이 있으면 TLP를 설정하고 기존 `tlp:*` 태그를 `tlp:<level>` 하나로 교체합니다.
/// - 메타데이터 쌍은 속성에 병합되며 같은 key는 덮어씁니다.
pub fn tag<S: AsRef<str>>(
    payload: &Payload,
    classification: Option<Tlp>,
    metadata: &[S],
) -> Result<Payload, DispatchError> {
    let pairs = parse_metadata(metadata)?;
    Ok(apply(payload, classification, &pairs))
}

fn apply(payload: &Payload, classification: Option<Tlp>, pairs: &[(String, String)]) -> Payload {
    payload.with_meta(|meta| {
        if let Some(tlp) = classification {
            meta.tlp = Some(tlp);
            meta.tags.retain(|t| !t.starts_with(TLP_TAG_PREFIX));
            meta.tags.insert(tlp.label());
        }
        for (key, value) in pairs {
            meta.attributes.insert(key.clone(), value.clone());
        }
    })
}

/// 수집된 모든 페이로드에 적용할 태깅 설정
///
/// 메타데이터는 생성 시 한 번만 검증하므로, 잘못된 설정은 시작 시점에 드러납니다.
#[derive(Debug, Clone, Default)]
pub struct Tagger {
    classification: Option<Tlp>,
    pairs: Vec<(String, String)>,
}

impl Tagger {
    pub fn new<S: AsRef<str>>(
        classification: Option<Tlp>,
        metadata: &[S],
    ) -> Result<Self, DispatchError> {
        Ok(Self {
            classification,
            pairs: parse_metadata(metadata)?,
        })
    }

    /// 태깅할 내용이 없는지 여부
    pub fn is_noop(&self) -> bool {
        self.classification.is_none() && self.pairs.is_empty()
    }

    pub fn classification(&self) -> Option<Tlp> {
        self.classification
    }

    /// 페이로드에 태깅을 적용합니다.
    pub fn apply(&self, payload: &Payload) -> Payload {
        if self.is_noop() {
            return payload.clone();
        }
        apply(payload, self.classification, &self.pairs)
    }
}
