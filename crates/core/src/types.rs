//! 도메인 타입 -- 시스템 전역에서 사용되는 공통 타입
//!
//! 페이로드, 플러그인 결과, 처리 요청, 출력 레코드를 정의합니다.
//! 디스패처, 라우터, 플러그인은 이 타입들로 데이터를 교환합니다.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ─── Tlp ─────────────────────────────────────────────────────────────

/// TLP(Traffic Light Protocol) 분류 레벨
///
/// 수집 시점에 페이로드에 부여되며 파이프라인 전체에서 변경되지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tlp {
    /// 공개 가능
    White,
    /// 커뮤니티 내 공유
    Green,
    /// 조직 내 제한 공유
    Amber,
    /// 수신자 한정
    Red,
}

impl Tlp {
    /// 태그 집합에 기록되는 레이블 (`tlp:amber` 형식)
    pub fn label(&self) -> String {
        format!("tlp:{self}")
    }
}

impl fmt::Display for Tlp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Green => write!(f, "green"),
            Self::Amber => write!(f, "amber"),
            Self::Red => write!(f, "red"),
        }
    }
}

impl FromStr for Tlp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "white" | "clear" => Ok(Self::White),
            "green" => Ok(Self::Green),
            "amber" => Ok(Self::Amber),
            "red" => Ok(Self::Red),
            other => Err(format!(
                "unknown TLP level '{other}', expected one of: white, green, amber, red"
            )),
        }
    }
}

// ─── Payload ─────────────────────────────────────────────────────────

/// 페이로드 메타데이터
///
/// 같은 lineage의 페이로드는 `lineage_id`를 공유하며,
/// `depth`는 부모보다 정확히 1 큽니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMeta {
    /// 페이로드 고유 ID (UUID v4)
    pub id: String,
    /// 원본 경로 (파일 경로 등, 없을 수 있음)
    pub origin: Option<String>,
    /// 수집 시각
    pub ingested_at: SystemTime,
    /// lineage ID -- 최상위 페이로드의 ID와 같습니다
    pub lineage_id: String,
    /// 부모 페이로드 ID
    pub parent_id: Option<String>,
    /// 재귀 깊이 (최상위 = 0)
    pub depth: u32,
    /// TLP 분류
    pub tlp: Option<Tlp>,
    /// 분류 태그 집합
    pub tags: BTreeSet<String>,
    /// 임의 key/value 속성
    pub attributes: BTreeMap<String, String>,
}

/// 분석 대상 페이로드
///
/// 생성 후에는 변경할 수 없습니다. 태깅은 새 페이로드를 반환하며,
/// 추출된 자식은 [`Payload::child`]로 생성합니다.
/// 내용은 `bytes::Bytes`로 보관하여 복제 비용이 참조 카운트 증가뿐입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    content: Bytes,
    meta: PayloadMeta,
}

impl Payload {
    /// 새 lineage를 시작하는 최상위 페이로드를 생성합니다.
    pub fn new(content: impl Into<Bytes>, origin: Option<String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            content: content.into(),
            meta: PayloadMeta {
                lineage_id: id.clone(),
                id,
                origin,
                ingested_at: SystemTime::now(),
                parent_id: None,
                depth: 0,
                tlp: None,
                tags: BTreeSet::new(),
                attributes: BTreeMap::new(),
            },
        }
    }

    /// 저장된 메타데이터로 페이로드를 복원합니다 (에러 큐 재처리 등).
    pub fn from_parts(content: impl Into<Bytes>, meta: PayloadMeta) -> Self {
        Self {
            content: content.into(),
            meta,
        }
    }

    /// 이 페이로드에서 추출된 자식 페이로드를 생성합니다.
    ///
    /// 자식은 부모의 lineage, 분류, 태그, 속성을 그대로 이어받고
    /// 깊이가 1 증가합니다.
    pub fn child(&self, content: impl Into<Bytes>, origin: Option<String>) -> Self {
        Self {
            content: content.into(),
            meta: PayloadMeta {
                id: uuid::Uuid::new_v4().to_string(),
                origin,
                ingested_at: SystemTime::now(),
                lineage_id: self.meta.lineage_id.clone(),
                parent_id: Some(self.meta.id.clone()),
                depth: self.meta.depth.saturating_add(1),
                tlp: self.meta.tlp,
                tags: self.meta.tags.clone(),
                attributes: self.meta.attributes.clone(),
            },
        }
    }

    /// 메타데이터를 변형한 새 페이로드를 반환합니다. 내용은 공유됩니다.
    pub fn with_meta(&self, f: impl FnOnce(&mut PayloadMeta)) -> Self {
        let mut meta = self.meta.clone();
        f(&mut meta);
        Self {
            content: self.content.clone(),
            meta,
        }
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn meta(&self) -> &PayloadMeta {
        &self.meta
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn lineage_id(&self) -> &str {
        &self.meta.lineage_id
    }

    pub fn depth(&self) -> u32 {
        self.meta.depth
    }

    pub fn origin(&self) -> Option<&str> {
        self.meta.origin.as_deref()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "payload {} (lineage={} depth={} size={} origin={})",
            self.meta.id,
            self.meta.lineage_id,
            self.meta.depth,
            self.content.len(),
            self.meta.origin.as_deref().unwrap_or("-"),
        )
    }
}

// ─── Worker 출력 ─────────────────────────────────────────────────────

/// 워커가 추출한 아티팩트
#[derive(Debug, Clone)]
pub struct Extracted {
    /// 추출된 원시 바이트
    pub content: Bytes,
    /// 추출 위치 설명 (예: `"offset:1024"`)
    pub origin: Option<String>,
    /// 재귀 디스패치 요청 여부
    pub dispatch: bool,
    /// 자식에 추가할 속성
    pub attributes: BTreeMap<String, String>,
}

impl Extracted {
    /// 재귀 디스패치를 요청하는 아티팩트를 생성합니다.
    pub fn dispatch(content: impl Into<Bytes>, origin: Option<String>) -> Self {
        Self {
            content: content.into(),
            origin,
            dispatch: true,
            attributes: BTreeMap::new(),
        }
    }

    /// 보관만 하고 재귀 처리하지 않는 아티팩트를 생성합니다.
    pub fn archive_only(content: impl Into<Bytes>, origin: Option<String>) -> Self {
        Self {
            dispatch: false,
            ..Self::dispatch(content, origin)
        }
    }
}

/// 워커 플러그인 한 번 실행의 출력
#[derive(Debug, Clone, Default)]
pub struct WorkerOutput {
    /// 구조화된 결과 본문
    pub body: serde_json::Value,
    /// 추출된 아티팩트
    pub extracted: Vec<Extracted>,
}

impl WorkerOutput {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            body,
            extracted: Vec::new(),
        }
    }

    pub fn with_extracted(mut self, extracted: Extracted) -> Self {
        self.extracted.push(extracted);
        self
    }
}

// ─── PluginResult ────────────────────────────────────────────────────

/// 플러그인 실행을 건너뛴 사유
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// 재귀 깊이 상한 초과
    RecursionLimitReached { depth: u32, max: u32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecursionLimitReached { depth, max } => {
                write!(f, "recursion limit reached: depth {depth} > max {max}")
            }
        }
    }
}

/// 플러그인 한 개의 실행 결과 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PluginOutcome {
    /// 성공
    Success,
    /// 실패 (다른 플러그인 실행에는 영향 없음)
    Failed { reason: String },
    /// 실행하지 않음
    Skipped { reason: SkipReason },
}

impl PluginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// 재귀 요청 여부가 표시된 자식 페이로드
#[derive(Debug, Clone)]
pub struct ExtractedPayload {
    pub payload: Payload,
    pub dispatch: bool,
}

/// 워커 플러그인 하나가 페이로드 하나를 처리한 결과
///
/// 정확히 하나의 [`ProcessingRequest`]에 속합니다 (`request_id`).
#[derive(Debug, Clone)]
pub struct PluginResult {
    /// 소속 처리 요청 ID
    pub request_id: String,
    /// 플러그인 이름
    pub plugin: String,
    /// 처리한 페이로드 ID
    pub payload_id: String,
    /// 결과 상태
    pub outcome: PluginOutcome,
    /// 결과 본문 (실패/스킵 시 `Null`)
    pub body: serde_json::Value,
    /// 추출된 자식 페이로드
    pub extracted: Vec<ExtractedPayload>,
}

impl PluginResult {
    /// 성공 결과를 생성합니다. 추출 아티팩트는 `payload`의 자식이 됩니다.
    pub fn success(
        request_id: &str,
        plugin: &str,
        payload: &Payload,
        output: WorkerOutput,
    ) -> Self {
        let extracted = output
            .extracted
            .into_iter()
            .map(|item| {
                let child = payload.child(item.content, item.origin);
                let child = if item.attributes.is_empty() {
                    child
                } else {
                    child.with_meta(|meta| meta.attributes.extend(item.attributes))
                };
                ExtractedPayload {
                    payload: child,
                    dispatch: item.dispatch,
                }
            })
            .collect();

        Self {
            request_id: request_id.to_owned(),
            plugin: plugin.to_owned(),
            payload_id: payload.id().to_owned(),
            outcome: PluginOutcome::Success,
            body: output.body,
            extracted,
        }
    }

    /// 실패 결과를 생성합니다.
    pub fn failed(request_id: &str, plugin: &str, payload: &Payload, reason: String) -> Self {
        Self::empty(request_id, plugin, payload, PluginOutcome::Failed { reason })
    }

    /// 스킵 결과를 생성합니다.
    pub fn skipped(request_id: &str, plugin: &str, payload: &Payload, reason: SkipReason) -> Self {
        Self::empty(request_id, plugin, payload, PluginOutcome::Skipped { reason })
    }

    fn empty(request_id: &str, plugin: &str, payload: &Payload, outcome: PluginOutcome) -> Self {
        Self {
            request_id: request_id.to_owned(),
            plugin: plugin.to_owned(),
            payload_id: payload.id().to_owned(),
            outcome,
            body: serde_json::Value::Null,
            extracted: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

// ─── 라우팅 ──────────────────────────────────────────────────────────

/// 결과 전달 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// 페이로드당 하나의 집계 레코드 (기본값)
    #[default]
    Combined,
    /// 플러그인 결과마다 하나의 레코드
    Split,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Combined => write!(f, "combined"),
            Self::Split => write!(f, "split"),
        }
    }
}

/// 페이로드 하나의 디스패치 시도
///
/// 디스패치마다 생성되며 라우팅이 끝나면 폐기됩니다.
/// 최종 실패 시 에러 채널에 그대로 저장됩니다.
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    /// 요청 ID (UUID v4)
    pub id: String,
    /// 대상 페이로드
    pub payload: Payload,
    /// 결정된 대상 워커 플러그인
    pub targets: Vec<String>,
    /// 출력 커넥터 이름
    pub output_connectors: Vec<String>,
    /// 아카이브 커넥터 이름
    pub archive_connector: Option<String>,
    /// 에러 큐 활성화 여부
    pub error_queue: bool,
}

/// 스킵 또는 실패한 플러그인 요약
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub plugin: String,
    pub reason: String,
}

/// 출력 커넥터로 전달되는 결과 레코드
///
/// combined 모드에서는 성공한 모든 플러그인 본문이 `results`에 모이고,
/// split 모드에서는 `plugin`이 채워지고 해당 플러그인 결과 하나만 담깁니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub request_id: String,
    pub payload_id: String,
    pub lineage_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub size: usize,
    /// 수집 시각 (Unix epoch 초)
    pub ingested_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tlp: Option<Tlp>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub attributes: BTreeMap<String, String>,
    /// split 모드의 대상 플러그인
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    /// 성공한 플러그인 이름 → 결과 본문
    pub results: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failed: Vec<OutcomeSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skipped: Vec<OutcomeSummary>,
    /// 추출된 자식 페이로드 ID
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub extracted: Vec<String>,
}

impl ResultRecord {
    /// 페이로드 메타데이터로 빈 레코드를 생성합니다.
    pub fn for_payload(request_id: &str, payload: &Payload) -> Self {
        let meta = payload.meta();
        Self {
            request_id: request_id.to_owned(),
            payload_id: meta.id.clone(),
            lineage_id: meta.lineage_id.clone(),
            parent_id: meta.parent_id.clone(),
            depth: meta.depth,
            origin: meta.origin.clone(),
            size: payload.len(),
            ingested_at: unix_secs(meta.ingested_at),
            tlp: meta.tlp,
            tags: meta.tags.clone(),
            attributes: meta.attributes.clone(),
            plugin: None,
            results: BTreeMap::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            extracted: Vec::new(),
        }
    }

    /// 플러그인 결과 하나를 레코드에 병합합니다.
    pub fn absorb(&mut self, result: &PluginResult) {
        match &result.outcome {
            PluginOutcome::Success => {
                self.results
                    .insert(result.plugin.clone(), result.body.clone());
            }
            PluginOutcome::Failed { reason } => self.failed.push(OutcomeSummary {
                plugin: result.plugin.clone(),
                reason: reason.clone(),
            }),
            PluginOutcome::Skipped { reason } => self.skipped.push(OutcomeSummary {
                plugin: result.plugin.clone(),
                reason: reason.to_string(),
            }),
        }
        self.extracted
            .extend(result.extracted.iter().map(|e| e.payload.id().to_owned()));
    }
}

/// 아카이브 커넥터로 전달되는 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub payload_id: String,
    pub lineage_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub size: usize,
    /// 아티팩트를 추출한 플러그인
    pub extracted_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tlp: Option<Tlp>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub attributes: BTreeMap<String, String>,
}

impl ArchiveMetadata {
    pub fn for_payload(payload: &Payload, extracted_by: &str) -> Self {
        let meta = payload.meta();
        Self {
            payload_id: meta.id.clone(),
            lineage_id: meta.lineage_id.clone(),
            parent_id: meta.parent_id.clone(),
            depth: meta.depth,
            origin: meta.origin.clone(),
            size: payload.len(),
            extracted_by: extracted_by.to_owned(),
            tlp: meta.tlp,
            attributes: meta.attributes.clone(),
        }
    }
}

/// `SystemTime`을 Unix epoch 초로 변환합니다. epoch 이전이면 0.
pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
