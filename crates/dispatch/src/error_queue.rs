//! 에러 채널 -- 최종 실패한 처리 요청의 내구성 큐
//!
//! 최종 실패(규칙/정책상 대상 없음, 모든 플러그인 실패, 모든 커넥터 거부)만
//! 기록됩니다. 기록된 요청은 `drain()`으로 꺼내 재처리할 수 있습니다.
//!
//! - [`JsonlErrorQueue`]: 한 줄에 하나의 JSON 엔트리를 append하고 줄마다 `fsync`
//! - [`MemoryErrorQueue`]: 테스트용 인메모리 큐
//!
//! 페이로드 바이트는 base64로 인코딩되어 저장됩니다.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use base64::{Engine as _, engine::general_purpose};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use sifter_core::metrics as m;
use sifter_core::plugin::BoxFuture;
use sifter_core::types::{Payload, PayloadMeta, ProcessingRequest, unix_secs};

use crate::error::DispatchError;

// ─── FailureReason ───────────────────────────────────────────────────

/// 최종 실패 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 대상 플러그인을 결정하지 못함
    NoPluginMatched,
    /// 실행 가능한 모든 플러그인이 실패함
    AllPluginsFailed,
    /// 어떤 출력 커넥터도 레코드를 받지 못함
    DeliveryFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPluginMatched => write!(f, "no_plugin_matched"),
            Self::AllPluginsFailed => write!(f, "all_plugins_failed"),
            Self::DeliveryFailed => write!(f, "delivery_failed"),
        }
    }
}

// ─── ErrorEntry ──────────────────────────────────────────────────────

/// 에러 큐에 저장되는 엔트리 한 건
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub request_id: String,
    pub reason: FailureReason,
    /// 사람이 읽을 수 있는 실패 상세
    pub detail: String,
    /// 실패 시각 (Unix epoch 초)
    pub failed_at: u64,
    pub targets: Vec<String>,
    pub output_connectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_connector: Option<String>,
    pub meta: PayloadMeta,
    /// base64 인코딩된 페이로드 내용
    pub content: String,
}

impl ErrorEntry {
    /// 처리 요청으로부터 엔트리를 생성합니다.
    pub fn new(request: &ProcessingRequest, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            request_id: request.id.clone(),
            reason,
            detail: detail.into(),
            failed_at: unix_secs(SystemTime::now()),
            targets: request.targets.clone(),
            output_connectors: request.output_connectors.clone(),
            archive_connector: request.archive_connector.clone(),
            meta: request.payload.meta().clone(),
            content: general_purpose::STANDARD.encode(request.payload.content()),
        }
    }

    /// 저장된 페이로드를 원래 메타데이터와 함께 복원합니다.
    pub fn payload(&self) -> Result<Payload, DispatchError> {
        let content = general_purpose::STANDARD
            .decode(&self.content)
            .map_err(|e| {
                DispatchError::ErrorQueue(format!(
                    "entry {} has corrupt payload content: {e}",
                    self.request_id
                ))
            })?;
        Ok(Payload::from_parts(content, self.meta.clone()))
    }
}

// ─── ErrorQueue trait ────────────────────────────────────────────────

/// 에러 큐 저장소
pub trait ErrorQueue: Send + Sync {
    /// 엔트리 하나를 기록합니다. 반환 시점에 내구성이 보장되어야 합니다.
    fn enqueue(&self, entry: ErrorEntry) -> BoxFuture<'_, Result<(), DispatchError>>;

    /// 저장된 모든 엔트리를 꺼내고 큐를 비웁니다.
    fn drain(&self) -> BoxFuture<'_, Result<Vec<ErrorEntry>, DispatchError>>;
}

// ─── JsonlErrorQueue ─────────────────────────────────────────────────

/// JSON Lines 파일 기반 에러 큐
pub struct JsonlErrorQueue {
    path: PathBuf,
    /// append와 drain을 직렬화
    lock: tokio::sync::Mutex<()>,
}

impl JsonlErrorQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> DispatchError {
        DispatchError::ErrorQueue(format!("{action} {}: {e}", self.path.display()))
    }

    async fn append(&self, entry: ErrorEntry) -> Result<(), DispatchError> {
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| DispatchError::ErrorQueue(format!("failed to encode entry: {e}")))?;
        line.push('\n');

        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error("failed to create directory for", e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error("failed to open", e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_error("failed to write", e))?;
        file.sync_data()
            .await
            .map_err(|e| self.io_error("failed to sync", e))?;

        tracing::debug!(
            request_id = %entry.request_id,
            reason = %entry.reason,
            path = %self.path.display(),
            "error queue entry written"
        );
        Ok(())
    }

    async fn take_all(&self) -> Result<Vec<ErrorEntry>, DispatchError> {
        let _guard = self.lock.lock().await;

        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error("failed to read", e)),
        };

        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: ErrorEntry = serde_json::from_str(line).map_err(|e| {
                DispatchError::ErrorQueue(format!(
                    "{}:{}: corrupt entry: {e}",
                    self.path.display(),
                    idx + 1
                ))
            })?;
            entries.push(entry);
        }

        // 모두 파싱된 뒤에만 비웁니다.
        let file = tokio::fs::File::create(&self.path)
            .await
            .map_err(|e| self.io_error("failed to truncate", e))?;
        file.sync_all()
            .await
            .map_err(|e| self.io_error("failed to sync", e))?;

        tracing::info!(
            path = %self.path.display(),
            count = entries.len(),
            "drained error queue"
        );
        Ok(entries)
    }
}

impl ErrorQueue for JsonlErrorQueue {
    fn enqueue(&self, entry: ErrorEntry) -> BoxFuture<'_, Result<(), DispatchError>> {
        Box::pin(self.append(entry))
    }

    fn drain(&self) -> BoxFuture<'_, Result<Vec<ErrorEntry>, DispatchError>> {
        Box::pin(self.take_all())
    }
}

// ─── MemoryErrorQueue ────────────────────────────────────────────────

/// 인메모리 에러 큐 (테스트용)
#[derive(Default)]
pub struct MemoryErrorQueue {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl MemoryErrorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 현재 저장된 엔트리의 복사본
    pub fn entries(&self) -> Vec<ErrorEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorQueue for MemoryErrorQueue {
    fn enqueue(&self, entry: ErrorEntry) -> BoxFuture<'_, Result<(), DispatchError>> {
        Box::pin(async move {
            self.entries
                .lock()
                .map_err(|e| DispatchError::ErrorQueue(e.to_string()))?
                .push(entry);
            Ok(())
        })
    }

    fn drain(&self) -> BoxFuture<'_, Result<Vec<ErrorEntry>, DispatchError>> {
        Box::pin(async move {
            let mut guard = self
                .entries
                .lock()
                .map_err(|e| DispatchError::ErrorQueue(e.to_string()))?;
            Ok(std::mem::take(&mut *guard))
        })
    }
}

// ─── ErrorChannel ────────────────────────────────────────────────────

/// 에러 채널 -- 에러 큐가 활성화된 경우에만 최종 실패를 기록합니다.
#[derive(Clone, Default)]
pub struct ErrorChannel {
    queue: Option<Arc<dyn ErrorQueue>>,
}

impl ErrorChannel {
    /// 큐를 사용하는 활성 채널
    pub fn new(queue: Arc<dyn ErrorQueue>) -> Self {
        Self { queue: Some(queue) }
    }

    /// 아무것도 기록하지 않는 채널
    pub fn disabled() -> Self {
        Self { queue: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.is_some()
    }

    /// 최종 실패한 요청을 기록합니다.
    ///
    /// 채널이 비활성이거나 요청이 에러 큐를 사용하지 않으면 `Ok(false)`를 반환합니다.
    /// 기록 실패는 호출자에게 그대로 전파되어야 합니다.
    pub async fn enqueue(
        &self,
        request: &ProcessingRequest,
        reason: FailureReason,
        detail: &str,
    ) -> Result<bool, DispatchError> {
        let Some(queue) = self.queue.as_ref().filter(|_| request.error_queue) else {
            tracing::debug!(
                request_id = %request.id,
                %reason,
                "error queue disabled, dropping failed request"
            );
            return Ok(false);
        };

        queue
            .enqueue(ErrorEntry::new(request, reason, detail))
            .await?;
        counter!(m::ERROR_QUEUE_ENTRIES_TOTAL, m::LABEL_REASON => reason.to_string())
            .increment(1);
        tracing::warn!(
            request_id = %request.id,
            payload_id = request.payload.id(),
            %reason,
            detail,
            "request queued for reprocessing"
        );
        Ok(true)
    }

    /// 큐의 모든 엔트리를 꺼냅니다. 비활성 채널은 빈 목록을 반환합니다.
    pub async fn drain(&self) -> Result<Vec<ErrorEntry>, DispatchError> {
        match &self.queue {
            Some(queue) => queue.drain().await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(error_queue: bool) -> ProcessingRequest {
        ProcessingRequest {
            id: "req-1".to_owned(),
            payload: Payload::new(vec![0x00, 0xFF, b'%', b'P'], Some("/tmp/blob".to_owned())),
            targets: vec!["pdf".to_owned()],
            output_connectors: vec!["stdout".to_owned()],
            archive_connector: None,
            error_queue,
        }
    }

    #[test]
    fn failure_reason_display_matches_serde() {
        for reason in [
            FailureReason::NoPluginMatched,
            FailureReason::AllPluginsFailed,
            FailureReason::DeliveryFailed,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{reason}\""));
        }
    }

    #[test]
    fn entry_restores_binary_payload() {
        let req = request(true);
        let entry = ErrorEntry::new(&req, FailureReason::AllPluginsFailed, "pdf: boom");
        assert!(!entry.content.is_empty());

        let restored = entry.payload().unwrap();
        assert_eq!(restored.content(), req.payload.content());
        assert_eq!(restored.meta(), req.payload.meta());
    }

    #[test]
    fn corrupt_content_is_error_queue_error() {
        let mut entry = ErrorEntry::new(&request(true), FailureReason::DeliveryFailed, "");
        entry.content = "!!!not base64!!!".to_owned();
        assert!(matches!(
            entry.payload().unwrap_err(),
            DispatchError::ErrorQueue(_)
        ));
    }

    #[tokio::test]
    async fn jsonl_queue_appends_and_drains() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JsonlErrorQueue::new(dir.path().join("nested").join("errors.jsonl"));

        queue
            .enqueue(ErrorEntry::new(&request(true), FailureReason::NoPluginMatched, "no rule"))
            .await
            .unwrap();
        queue
            .enqueue(ErrorEntry::new(&request(true), FailureReason::DeliveryFailed, "stdout down"))
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(queue.path()).await.unwrap();
        assert_eq!(raw.lines().count(), 2);

        let drained = queue.drain().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].reason, FailureReason::NoPluginMatched);
        assert_eq!(drained[1].detail, "stdout down");

        // 비워진 뒤에는 빈 목록
        assert!(queue.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn jsonl_drain_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JsonlErrorQueue::new(dir.path().join("absent.jsonl"));
        assert!(queue.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn jsonl_corrupt_line_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.jsonl");
        tokio::fs::write(&path, "{not json}\n").await.unwrap();

        let queue = JsonlErrorQueue::new(&path);
        let err = queue.drain().await.unwrap_err();
        assert!(err.to_string().contains(":1: corrupt entry"));
        assert_eq!(
            tokio::fs::read_to_string(&path).await.unwrap(),
            "{not json}\n"
        );
    }

    #[tokio::test]
    async fn jsonl_enqueue_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // 디렉토리를 파일 경로로 사용하면 열기에 실패합니다.
        let queue = JsonlErrorQueue::new(dir.path());
        let err = queue
            .enqueue(ErrorEntry::new(&request(true), FailureReason::NoPluginMatched, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ErrorQueue(_)));
    }

    #[tokio::test]
    async fn channel_records_only_when_enabled() {
        let queue = Arc::new(MemoryErrorQueue::new());
        let channel = ErrorChannel::new(queue.clone());

        assert!(
            channel
                .enqueue(&request(true), FailureReason::AllPluginsFailed, "x")
                .await
                .unwrap()
        );
        assert!(
            !channel
                .enqueue(&request(false), FailureReason::AllPluginsFailed, "x")
                .await
                .unwrap()
        );
        assert_eq!(queue.len(), 1);

        let disabled = ErrorChannel::disabled();
        assert!(!disabled.is_enabled());
        assert!(
            !disabled
                .enqueue(&request(true), FailureReason::AllPluginsFailed, "x")
                .await
                .unwrap()
        );
        assert!(disabled.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_queue_drain_empties() {
        let queue = MemoryErrorQueue::new();
        queue
            .enqueue(ErrorEntry::new(&request(true), FailureReason::DeliveryFailed, ""))
            .await
            .unwrap();
        assert_eq!(queue.drain().await.unwrap().len(), 1);
        assert!(queue.is_empty());
    }
}
