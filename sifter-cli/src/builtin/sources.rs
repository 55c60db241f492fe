//! 내장 소스 플러그인
//!
//! - [`FileSource`] (`file`): 파일 하나 또는 디렉토리 전체를 재귀적으로 수집
//! - [`ErrorQueueSource`] (`error-queue`): 에러 큐에 기록된 요청을 꺼내 재처리

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use sifter_core::config::IngestConfig;
use sifter_core::error::PluginError;
use sifter_core::plugin::{Plugin, PluginInfo, PluginType, SourcePlugin};
use sifter_core::types::Payload;
use sifter_dispatch::{ErrorEntry, ErrorQueue, JsonlErrorQueue};

// ─── FileSource ──────────────────────────────────────────────────────

/// 파일 시스템 소스
///
/// `ingest.path`가 파일이면 그 파일 하나를, 디렉토리면 하위 모든 일반 파일을
/// 경로 순으로 보냅니다. 읽을 수 없는 파일은 경고 후 건너뜁니다.
pub struct FileSource {
    info: PluginInfo,
}

impl FileSource {
    pub fn new() -> Self {
        Self {
            info: PluginInfo::new(
                "file",
                PluginType::Source,
                "reads a file or walks a directory",
            ),
        }
    }

    fn ingest_error(&self, reason: impl Into<String>) -> PluginError {
        PluginError::Ingest {
            name: self.name().to_owned(),
            reason: reason.into(),
        }
    }

    async fn send_file(
        &self,
        path: &Path,
        tx: &mpsc::Sender<Payload>,
    ) -> Result<bool, PluginError> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                return Ok(false);
            }
        };
        let payload = Payload::new(content, Some(path.display().to_string()));
        tracing::debug!(path = %path.display(), payload_id = payload.id(), "ingested file");
        tx.send(payload)
            .await
            .map_err(|_| self.ingest_error("payload channel closed"))?;
        Ok(true)
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for FileSource {
    fn info(&self) -> &PluginInfo {
        &self.info
    }
}

impl SourcePlugin for FileSource {
    async fn ingest(
        &self,
        config: &IngestConfig,
        tx: mpsc::Sender<Payload>,
    ) -> Result<usize, PluginError> {
        if config.path.is_empty() {
            return Err(self.ingest_error("ingest path is not set"));
        }
        let root = PathBuf::from(&config.path);
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| self.ingest_error(format!("{}: {e}", root.display())))?;

        if metadata.is_file() {
            let sent = self.send_file(&root, &tx).await?;
            return Ok(usize::from(sent));
        }

        let mut sent = 0;
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| self.ingest_error(format!("{}: {e}", dir.display())))?;

            let mut files = Vec::new();
            let mut dirs = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| self.ingest_error(format!("{}: {e}", dir.display())))?
            {
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) => {
                        tracing::warn!(path = %entry.path().display(), error = %e, "skipping entry");
                        continue;
                    }
                };
                if file_type.is_dir() {
                    dirs.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }

            files.sort();
            for path in &files {
                if self.send_file(path, &tx).await? {
                    sent += 1;
                }
            }

            // 스택이므로 역순으로 넣어야 경로 순으로 방문
            dirs.sort_by(|a, b| b.cmp(a));
            pending.extend(dirs);
        }

        Ok(sent)
    }
}

// ─── ErrorQueueSource ────────────────────────────────────────────────

/// 에러 큐 소스
///
/// 큐 전체를 꺼낸 뒤 원래 메타데이터(lineage, 깊이, 태그)를 보존한 채
/// 페이로드를 다시 보냅니다. 내용이 손상된 엔트리는 큐에 되돌려 놓습니다.
pub struct ErrorQueueSource {
    info: PluginInfo,
    queue: JsonlErrorQueue,
}

impl ErrorQueueSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            info: PluginInfo::new(
                "error-queue",
                PluginType::Source,
                "reprocesses requests recorded in the error queue",
            ),
            queue: JsonlErrorQueue::new(path),
        }
    }

    fn ingest_error(&self, reason: impl Into<String>) -> PluginError {
        PluginError::Ingest {
            name: self.name().to_owned(),
            reason: reason.into(),
        }
    }
}

impl Plugin for ErrorQueueSource {
    fn info(&self) -> &PluginInfo {
        &self.info
    }
}

impl SourcePlugin for ErrorQueueSource {
    async fn ingest(
        &self,
        _config: &IngestConfig,
        tx: mpsc::Sender<Payload>,
    ) -> Result<usize, PluginError> {
        let entries = self
            .queue
            .drain()
            .await
            .map_err(|e| self.ingest_error(e.to_string()))?;
        tracing::info!(
            path = %self.queue.path().display(),
            entries = entries.len(),
            "draining error queue"
        );

        let mut sent = 0;
        let mut pending = entries.into_iter();
        while let Some(entry) = pending.next() {
            let payload = match entry.payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(
                        request_id = %entry.request_id,
                        error = %e,
                        "restoring corrupt error queue entry"
                    );
                    self.queue
                        .enqueue(entry)
                        .await
                        .map_err(|e| self.ingest_error(e.to_string()))?;
                    continue;
                }
            };
            tracing::debug!(
                request_id = %entry.request_id,
                reason = %entry.reason,
                payload_id = payload.id(),
                "reprocessing queued request"
            );
            if tx.send(payload).await.is_err() {
                let restored = self.restore(std::iter::once(entry).chain(pending)).await?;
                return Err(self.ingest_error(format!(
                    "payload channel closed, {restored} entries restored to the queue"
                )));
            }
            sent += 1;
        }
        Ok(sent)
    }
}

impl ErrorQueueSource {
    /// 보내지 못한 엔트리를 큐에 되돌려 놓고 그 수를 반환합니다.
    async fn restore(
        &self,
        entries: impl Iterator<Item = ErrorEntry>,
    ) -> Result<usize, PluginError> {
        let mut restored = 0;
        for entry in entries {
            self.queue
                .enqueue(entry)
                .await
                .map_err(|e| self.ingest_error(e.to_string()))?;
            restored += 1;
        }
        tracing::warn!(
            path = %self.queue.path().display(),
            restored,
            "restored unsent error queue entries"
        );
        Ok(restored)
    }
}
