//! 내장 워커 플러그인
//!
//! - [`MagicWorker`] (`magic`): 매직 넘버로 파일 형식 판별
//! - [`StringsWorker`] (`strings`): 출력 가능한 ASCII 문자열 추출
//! - [`CarveWorker`] (`carve`): 내장된 PDF/ZIP/PE 세그먼트를 잘라내 재귀 처리

use serde_json::json;

use sifter_core::error::PluginError;
use sifter_core::plugin::{Plugin, PluginInfo, PluginType, WorkerPlugin};
use sifter_core::types::{Extracted, Payload, WorkerOutput};

/// 매직 넘버 시그니처: (형식, MIME, 오프셋 0의 바이트열)
const SIGNATURES: &[(&str, &str, &[u8])] = &[
    ("pdf", "application/pdf", b"%PDF-"),
    ("zip", "application/zip", b"PK\x03\x04"),
    (
        "ole",
        "application/x-ole-storage",
        b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1",
    ),
    ("elf", "application/x-executable", b"\x7FELF"),
    ("png", "image/png", b"\x89PNG\r\n\x1A\n"),
    ("gif", "image/gif", b"GIF8"),
    ("jpeg", "image/jpeg", b"\xFF\xD8\xFF"),
    ("gzip", "application/gzip", b"\x1F\x8B"),
    (
        "pe",
        "application/vnd.microsoft.portable-executable",
        b"MZ",
    ),
];

/// 텍스트 판별 시 검사할 최대 바이트 수
const TEXT_SNIFF_LEN: usize = 4096;

// ─── MagicWorker ─────────────────────────────────────────────────────

/// 매직 넘버 기반 형식 판별 워커
pub struct MagicWorker {
    info: PluginInfo,
}

impl MagicWorker {
    pub fn new() -> Self {
        Self {
            info: PluginInfo::new("magic", PluginType::Worker, "file type by magic number"),
        }
    }
}

impl Default for MagicWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// 내용의 형식과 MIME 타입을 판별합니다.
pub fn identify(content: &[u8]) -> (&'static str, &'static str) {
    if let Some(&(kind, mime, _)) = SIGNATURES
        .iter()
        .find(|&&(_, _, magic)| content.starts_with(magic))
    {
        return (kind, mime);
    }
    if content.is_empty() {
        return ("empty", "application/x-empty");
    }
    let sniff = &content[..content.len().min(TEXT_SNIFF_LEN)];
    let is_text = std::str::from_utf8(sniff)
        .is_ok_and(|s| !s.chars().any(|c| c.is_control() && !c.is_whitespace()));
    if is_text {
        ("text", "text/plain")
    } else {
        ("data", "application/octet-stream")
    }
}

impl Plugin for MagicWorker {
    fn info(&self) -> &PluginInfo {
        &self.info
    }
}

impl WorkerPlugin for MagicWorker {
    async fn run(&self, payload: &Payload) -> Result<WorkerOutput, PluginError> {
        let (kind, mime) = identify(payload.content());
        Ok(WorkerOutput::new(json!({
            "type": kind,
            "mime": mime,
            "size": payload.len(),
        })))
    }
}

// ─── StringsWorker ───────────────────────────────────────────────────

/// 출력 가능한 문자열 추출 워커
pub struct StringsWorker {
    info: PluginInfo,
    min_len: usize,
    limit: usize,
}

impl StringsWorker {
    /// 기본 최소 길이
    pub const DEFAULT_MIN_LEN: usize = 4;
    /// 기본 최대 문자열 수
    pub const DEFAULT_LIMIT: usize = 1024;

    pub fn new() -> Self {
        Self::with_limits(Self::DEFAULT_MIN_LEN, Self::DEFAULT_LIMIT)
    }

    pub fn with_limits(min_len: usize, limit: usize) -> Self {
        Self {
            info: PluginInfo::new("strings", PluginType::Worker, "printable ASCII strings"),
            min_len: min_len.max(1),
            limit,
        }
    }
}

impl Default for StringsWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// 길이가 `min_len` 이상인 출력 가능 ASCII 구간을 모두 찾습니다.
pub fn printable_strings(content: &[u8], min_len: usize) -> Vec<String> {
    content
        .split(|b| !(b.is_ascii_graphic() || *b == b' ' || *b == b'\t'))
        .filter(|run| run.len() >= min_len)
        .map(|run| String::from_utf8_lossy(run).into_owned())
        .collect()
}

impl Plugin for StringsWorker {
    fn info(&self) -> &PluginInfo {
        &self.info
    }
}

impl WorkerPlugin for StringsWorker {
    async fn run(&self, payload: &Payload) -> Result<WorkerOutput, PluginError> {
        let mut strings = printable_strings(payload.content(), self.min_len);
        let count = strings.len();
        let truncated = count > self.limit;
        strings.truncate(self.limit);
        Ok(WorkerOutput::new(json!({
            "count": count,
            "truncated": truncated,
            "strings": strings,
        })))
    }
}

// ─── CarveWorker ─────────────────────────────────────────────────────

const CARVE_RULES: &str = r#"
id: carve_embedded
title: Embedded document or executable
description: PDF, ZIP or PE header somewhere in the content
plugins: [carve]
patterns:
  - modifier: hex
    value: "25 50 44 46 2D"
  - modifier: hex
    value: "50 4B 03 04"
  - modifier: hex
    value: "50 45 00 00"
tags: [embedded]
"#;

/// 내장 세그먼트 추출 워커
///
/// 오프셋 0이 아닌 위치의 PDF/ZIP/PE 헤더를 찾아, 그 위치부터 다음 헤더 직전
/// (또는 끝)까지를 하위 페이로드로 추출합니다. 추출물은 재귀 디스패치됩니다.
pub struct CarveWorker {
    info: PluginInfo,
}

impl CarveWorker {
    pub fn new() -> Self {
        Self {
            info: PluginInfo::new(
                "carve",
                PluginType::Worker,
                "extracts embedded PDF/ZIP/PE segments",
            ),
        }
    }
}

impl Default for CarveWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// 잘라낸 세그먼트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: &'static str,
    pub offset: usize,
    pub end: usize,
}

/// 오프셋 0 이후의 내장 헤더 위치를 찾아 세그먼트로 나눕니다.
pub fn find_segments(content: &[u8]) -> Vec<Segment> {
    let mut starts: Vec<(usize, &'static str)> = Vec::new();
    for offset in 1..content.len() {
        let rest = &content[offset..];
        if rest.starts_with(b"%PDF-") {
            starts.push((offset, "pdf"));
        } else if rest.starts_with(b"PK\x03\x04") {
            starts.push((offset, "zip"));
        } else if rest.starts_with(b"MZ") && is_pe(rest) {
            starts.push((offset, "pe"));
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &(offset, kind))| Segment {
            kind,
            offset,
            end: starts.get(i + 1).map_or(content.len(), |&(next, _)| next),
        })
        .collect()
}

/// DOS 헤더의 `e_lfanew`가 `PE\0\0` 시그니처를 가리키는지 확인합니다.
fn is_pe(content: &[u8]) -> bool {
    let Some(raw) = content.get(0x3C..0x40) else {
        return false;
    };
    let e_lfanew = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    content
        .get(e_lfanew..e_lfanew.saturating_add(4))
        .is_some_and(|sig| sig == b"PE\0\0")
}

impl Plugin for CarveWorker {
    fn info(&self) -> &PluginInfo {
        &self.info
    }
}

impl WorkerPlugin for CarveWorker {
    fn dispatch_rules(&self) -> Option<&str> {
        Some(CARVE_RULES)
    }

    async fn run(&self, payload: &Payload) -> Result<WorkerOutput, PluginError> {
        let content = payload.content();
        let segments = find_segments(content);

        let carved: Vec<_> = segments
            .iter()
            .map(|s| json!({ "type": s.kind, "offset": s.offset, "size": s.end - s.offset }))
            .collect();
        let mut output = WorkerOutput::new(json!({ "carved": carved }));

        for segment in &segments {
            let mut extracted = Extracted::dispatch(
                content.slice(segment.offset..segment.end),
                Some(format!("offset:{}", segment.offset)),
            );
            extracted
                .attributes
                .insert("carved_type".to_owned(), segment.kind.to_owned());
            output = output.with_extracted(extracted);
        }

        if !segments.is_empty() {
            tracing::debug!(
                payload_id = payload.id(),
                segments = segments.len(),
                "carved embedded segments"
            );
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sifter_dispatch::RuleMatcher;

    fn pe_image() -> Vec<u8> {
        let mut image = vec![0u8; 0x80];
        image[0] = b'M';
        image[1] = b'Z';
        image[0x3C..0x40].copy_from_slice(&0x40u32.to_le_bytes());
        image[0x40..0x44].copy_from_slice(b"PE\0\0");
        image
    }

    // ── magic ──

    #[test]
    fn identify_known_signatures() {
        assert_eq!(identify(b"%PDF-1.7\n").0, "pdf");
        assert_eq!(identify(b"PK\x03\x04rest").0, "zip");
        assert_eq!(identify(b"\x7FELF\x02\x01").0, "elf");
        assert_eq!(identify(&pe_image()).0, "pe");
        assert_eq!(identify(b"\x1F\x8B\x08").1, "application/gzip");
    }

    #[test]
    fn identify_text_data_and_empty() {
        assert_eq!(identify(b"hello world\n").0, "text");
        assert_eq!(identify(b"\x00\x01\x02\x03").0, "data");
        assert_eq!(identify(b"").0, "empty");
    }

    #[tokio::test]
    async fn magic_worker_reports_type_and_size() {
        let payload = Payload::new(&b"%PDF-1.4 body"[..], None);
        let output = MagicWorker::new().run(&payload).await.unwrap();
        assert_eq!(output.body["type"], "pdf");
        assert_eq!(output.body["mime"], "application/pdf");
        assert_eq!(output.body["size"], 13);
        assert!(output.extracted.is_empty());
    }

    // ── strings ──

    #[test]
    fn printable_strings_respects_min_len() {
        let content = b"ab\x00hello\x01\x02world wide\xFFxyz";
        assert_eq!(printable_strings(content, 4), vec!["hello", "world wide"]);
        assert_eq!(printable_strings(content, 3).len(), 3);
    }

    #[tokio::test]
    async fn strings_worker_truncates_to_limit() {
        let payload = Payload::new(&b"alpha\x00bravo\x00charlie\x00delta"[..], None);
        let output = StringsWorker::with_limits(4, 2).run(&payload).await.unwrap();
        assert_eq!(output.body["count"], 4);
        assert_eq!(output.body["truncated"], true);
        assert_eq!(output.body["strings"], json!(["alpha", "bravo"]));
    }

    // ── carve ──

    #[test]
    fn find_segments_splits_on_embedded_headers() {
        let mut content = b"junk".to_vec();
        content.extend_from_slice(b"%PDF-1.7 doc");
        content.extend_from_slice(b"PK\x03\x04zip");

        let segments = find_segments(&content);
        assert_eq!(
            segments,
            vec![
                Segment { kind: "pdf", offset: 4, end: 16 },
                Segment { kind: "zip", offset: 16, end: content.len() },
            ]
        );
    }

    #[test]
    fn find_segments_ignores_header_at_offset_zero() {
        assert!(find_segments(b"%PDF-1.7 only").is_empty());
    }

    #[test]
    fn find_segments_requires_valid_pe_header() {
        let mut content = b"xxMZ not an executable".to_vec();
        assert!(find_segments(&content).is_empty());

        content.truncate(2);
        content.extend_from_slice(&pe_image());
        let segments = find_segments(&content);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind, "pe");
        assert_eq!(segments[0].offset, 2);
    }

    #[tokio::test]
    async fn carve_worker_extracts_children_for_dispatch() {
        let payload = Payload::new(&b"header%PDF-1.5 inner"[..], None);
        let output = CarveWorker::new().run(&payload).await.unwrap();

        assert_eq!(output.body["carved"][0]["type"], "pdf");
        assert_eq!(output.body["carved"][0]["offset"], 6);
        assert_eq!(output.extracted.len(), 1);
        let child = &output.extracted[0];
        assert!(child.dispatch);
        assert_eq!(child.content.as_ref(), b"%PDF-1.5 inner");
        assert_eq!(child.origin.as_deref(), Some("offset:6"));
        assert_eq!(child.attributes.get("carved_type").map(String::as_str), Some("pdf"));
    }

    #[test]
    fn carve_rules_match_embedded_content() {
        let mut matcher = RuleMatcher::new().with_enabled(true);
        let loaded = matcher.load_worker_rules(&CarveWorker::new()).unwrap();
        assert_eq!(loaded, 1);

        let embedded = Payload::new(&b"prefix PK\x03\x04 data"[..], None);
        let plain = Payload::new(&b"nothing to see"[..], None);
        assert!(matcher.match_payload(&embedded).contains("carve"));
        assert!(matcher.match_payload(&plain).is_empty());
    }
}
