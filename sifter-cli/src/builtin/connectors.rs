//! 내장 커넥터
//!
//! - [`StdoutConnector`] (`stdout`): 결과 레코드를 표준 출력으로 인코딩
//! - [`FileConnector`] (`file`): 결과 레코드를 JSON Lines 파일에 추가
//! - [`DirArchive`] (`dir`): 추출 페이로드를 디렉토리에 `<payload_id>` 파일로 보관

use std::io::Write;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use sifter_core::error::PluginError;
use sifter_core::plugin::{
    ArchiveConnector, OutputConnector, Plugin, PluginInfo, PluginType,
};
use sifter_core::types::{ArchiveMetadata, ResultRecord};

use crate::cli::Template;

/// 템플릿에 맞춰 레코드를 한 덩어리의 텍스트로 인코딩합니다.
pub fn encode(record: &ResultRecord, template: Template) -> Result<String, serde_json::Error> {
    match template {
        Template::Json => serde_json::to_string_pretty(record),
        Template::Compact => serde_json::to_string(record),
    }
}

/// 설정 문자열을 템플릿으로 변환합니다. 알 수 없는 값은 `json`.
pub fn template_from_config(name: &str) -> Template {
    match name {
        "compact" => Template::Compact,
        _ => Template::Json,
    }
}

// ─── StdoutConnector ─────────────────────────────────────────────────

/// 표준 출력 커넥터
pub struct StdoutConnector {
    info: PluginInfo,
    template: Template,
}

impl StdoutConnector {
    pub fn new(template: Template) -> Self {
        Self {
            info: PluginInfo::new("stdout", PluginType::Connector, "writes records to stdout"),
            template,
        }
    }
}

impl Plugin for StdoutConnector {
    fn info(&self) -> &PluginInfo {
        &self.info
    }
}

impl OutputConnector for StdoutConnector {
    async fn save(&self, record: &ResultRecord) -> Result<(), PluginError> {
        let text = encode(record, self.template)
            .map_err(|e| PluginError::delivery(self.name(), e.to_string()))?;
        // 레코드 단위로 잠가 동시 저장 시 출력이 섞이지 않도록 함
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{text}").map_err(|e| PluginError::delivery(self.name(), e.to_string()))
    }
}

// ─── FileConnector ───────────────────────────────────────────────────

/// JSON Lines 파일 커넥터
///
/// 파일은 첫 저장 시점에 append 모드로 열립니다. 템플릿과 무관하게 한 줄에
/// 레코드 하나를 씁니다.
pub struct FileConnector {
    info: PluginInfo,
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl FileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            info: PluginInfo::new(
                "file",
                PluginType::Connector,
                "appends records to a JSON Lines file",
            ),
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    fn delivery_error(&self, e: impl std::fmt::Display) -> PluginError {
        PluginError::delivery(self.name(), format!("{}: {e}", self.path.display()))
    }
}

impl Plugin for FileConnector {
    fn info(&self) -> &PluginInfo {
        &self.info
    }
}

impl OutputConnector for FileConnector {
    async fn save(&self, record: &ResultRecord) -> Result<(), PluginError> {
        let mut line =
            encode(record, Template::Compact).map_err(|e| self.delivery_error(e))?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.delivery_error(e))?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| self.delivery_error(e))?;
            *guard = Some(file);
        }
        let Some(file) = guard.as_mut() else {
            return Err(self.delivery_error("file handle unavailable"));
        };
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.delivery_error(e))?;
        file.flush().await.map_err(|e| self.delivery_error(e))
    }
}

// ─── DirArchive ──────────────────────────────────────────────────────

/// 디렉토리 보관 커넥터
///
/// `<dir>/<payload_id>`에 원본 바이트를, `<dir>/<payload_id>.json`에
/// 메타데이터를 저장합니다.
pub struct DirArchive {
    info: PluginInfo,
    dir: PathBuf,
}

impl DirArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            info: PluginInfo::new(
                "dir",
                PluginType::Archive,
                "stores extracted payloads in a directory",
            ),
            dir: dir.into(),
        }
    }

    fn archive_error(&self, e: impl std::fmt::Display) -> PluginError {
        PluginError::delivery(self.name(), format!("{}: {e}", self.dir.display()))
    }
}

impl Plugin for DirArchive {
    fn info(&self) -> &PluginInfo {
        &self.info
    }
}

impl ArchiveConnector for DirArchive {
    async fn save(&self, content: &Bytes, metadata: &ArchiveMetadata) -> Result<(), PluginError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.archive_error(e))?;

        let meta = serde_json::to_vec_pretty(metadata).map_err(|e| self.archive_error(e))?;
        let content_path = self.dir.join(&metadata.payload_id);
        let meta_path = self.dir.join(format!("{}.json", metadata.payload_id));

        tokio::fs::write(&content_path, content)
            .await
            .map_err(|e| self.archive_error(e))?;
        tokio::fs::write(&meta_path, meta)
            .await
            .map_err(|e| self.archive_error(e))?;

        tracing::debug!(
            payload_id = %metadata.payload_id,
            path = %content_path.display(),
            "archived payload"
        );
        Ok(())
    }
}
