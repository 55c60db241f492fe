//! 플러그인 시스템 -- 플러그인 계약과 이름 기반 레지스트리
//!
//! 네 종류의 플러그인 계약을 정의합니다.
//!
//! - [`SourcePlugin`]: 페이로드를 수집하여 채널로 전달
//! - [`WorkerPlugin`]: 페이로드 하나를 분석하여 [`WorkerOutput`] 생성
//! - [`OutputConnector`]: 결과 레코드 저장
//! - [`ArchiveConnector`]: 추출된 페이로드 원본 보관
//!
//! 각 계약은 RPITIT(`impl Future`)를 쓰는 정적 trait과, `BoxFuture`를 반환하는
//! dyn-compatible 동반 trait(`Dyn*`)으로 나뉩니다. 정적 trait을 구현하면
//! 동반 trait은 자동으로 구현되므로 `Arc<dyn DynWorker>` 형태로 레지스트리에
//! 등록할 수 있습니다.
//!
//! [`PluginRegistry`]는 시작 시점에 이름 → 구현체를 한 번 결정하며,
//! 디스패치 중에는 읽기 전용으로 사용됩니다.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::IngestConfig;
use crate::error::PluginError;
use crate::types::{ArchiveMetadata, Payload, ResultRecord, WorkerOutput};

/// dyn-compatible trait에서 사용하는 박싱된 Future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ─── PluginType ──────────────────────────────────────────────────────

/// 플러그인 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// 페이로드 수집
    Source,
    /// 페이로드 분석
    Worker,
    /// 결과 출력
    Connector,
    /// 원본 보관
    Archive,
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Worker => write!(f, "worker"),
            Self::Connector => write!(f, "connector"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

// ─── PluginInfo ──────────────────────────────────────────────────────

/// 플러그인 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// 플러그인 고유 이름 (예: `"magic"`)
    pub name: String,
    /// 플러그인 버전
    pub version: String,
    /// 플러그인 설명
    pub description: String,
    /// 플러그인 유형
    pub plugin_type: PluginType,
}

impl PluginInfo {
    pub fn new(
        name: impl Into<String>,
        plugin_type: PluginType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            description: description.into(),
            plugin_type,
        }
    }
}

/// 모든 플러그인이 구현하는 공통 trait
pub trait Plugin: Send + Sync {
    /// 플러그인 메타데이터를 반환합니다.
    fn info(&self) -> &PluginInfo;

    /// 플러그인 이름
    fn name(&self) -> &str {
        &self.info().name
    }
}

// ─── Source ──────────────────────────────────────────────────────────

/// 수집 플러그인
///
/// 설정된 원천(파일, 디렉토리, 에러 큐 등)에서 페이로드를 만들어
/// `tx`로 하나씩 보냅니다. 채널이 bounded이므로 소비 속도에 맞춰
/// 지연 생성됩니다. 보낸 페이로드 수를 반환합니다.
pub trait SourcePlugin: Plugin {
    fn ingest(
        &self,
        config: &IngestConfig,
        tx: mpsc::Sender<Payload>,
    ) -> impl Future<Output = Result<usize, PluginError>> + Send;
}

/// dyn-compatible 수집 플러그인
pub trait DynSource: Plugin {
    fn ingest<'a>(
        &'a self,
        config: &'a IngestConfig,
        tx: mpsc::Sender<Payload>,
    ) -> BoxFuture<'a, Result<usize, PluginError>>;
}

impl<T: SourcePlugin> DynSource for T {
    fn ingest<'a>(
        &'a self,
        config: &'a IngestConfig,
        tx: mpsc::Sender<Payload>,
    ) -> BoxFuture<'a, Result<usize, PluginError>> {
        Box::pin(SourcePlugin::ingest(self, config, tx))
    }
}

// ─── Worker ──────────────────────────────────────────────────────────

/// 분석 워커 플러그인
///
/// # 구현 예시
/// ```ignore
/// struct SizeWorker { info: PluginInfo }
///
/// impl Plugin for SizeWorker {
///     fn info(&self) -> &PluginInfo { &self.info }
/// }
///
/// impl WorkerPlugin for SizeWorker {
///     async fn run(&self, payload: &Payload) -> Result<WorkerOutput, PluginError> {
///         Ok(WorkerOutput::new(serde_json::json!({ "size": payload.len() })))
///     }
/// }
/// ```
pub trait WorkerPlugin: Plugin {
    /// 워커 자체 디스패치 규칙 (YAML 규칙 형식)
    ///
    /// 반환된 규칙은 시작 시점에 규칙 파일과 함께 로드됩니다.
    fn dispatch_rules(&self) -> Option<&str> {
        None
    }

    /// 페이로드 하나를 분석합니다.
    fn run(
        &self,
        payload: &Payload,
    ) -> impl Future<Output = Result<WorkerOutput, PluginError>> + Send;
}

/// dyn-compatible 워커 플러그인
pub trait DynWorker: Plugin {
    fn dispatch_rules(&self) -> Option<&str>;

    fn run<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<WorkerOutput, PluginError>>;
}

impl<T: WorkerPlugin> DynWorker for T {
    fn dispatch_rules(&self) -> Option<&str> {
        WorkerPlugin::dispatch_rules(self)
    }

    fn run<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<WorkerOutput, PluginError>> {
        Box::pin(WorkerPlugin::run(self, payload))
    }
}

// ─── Connectors ──────────────────────────────────────────────────────

/// 결과 출력 커넥터
pub trait OutputConnector: Plugin {
    fn save(&self, record: &ResultRecord) -> impl Future<Output = Result<(), PluginError>> + Send;
}

/// dyn-compatible 결과 출력 커넥터
pub trait DynOutput: Plugin {
    fn save<'a>(&'a self, record: &'a ResultRecord) -> BoxFuture<'a, Result<(), PluginError>>;
}

impl<T: OutputConnector> DynOutput for T {
    fn save<'a>(&'a self, record: &'a ResultRecord) -> BoxFuture<'a, Result<(), PluginError>> {
        Box::pin(OutputConnector::save(self, record))
    }
}

/// 추출 페이로드 보관 커넥터
pub trait ArchiveConnector: Plugin {
    fn save(
        &self,
        content: &Bytes,
        metadata: &ArchiveMetadata,
    ) -> impl Future<Output = Result<(), PluginError>> + Send;
}

/// dyn-compatible 보관 커넥터
pub trait DynArchive: Plugin {
    fn save<'a>(
        &'a self,
        content: &'a Bytes,
        metadata: &'a ArchiveMetadata,
    ) -> BoxFuture<'a, Result<(), PluginError>>;
}

impl<T: ArchiveConnector> DynArchive for T {
    fn save<'a>(
        &'a self,
        content: &'a Bytes,
        metadata: &'a ArchiveMetadata,
    ) -> BoxFuture<'a, Result<(), PluginError>> {
        Box::pin(ArchiveConnector::save(self, content, metadata))
    }
}

// ─── PluginRegistry ──────────────────────────────────────────────────

/// 유형별 이름 → 구현체 목록. 등록 순서를 보존합니다.
struct Slots<T: ?Sized> {
    entries: Vec<Arc<T>>,
}

impl<T: ?Sized + Plugin> Slots<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn register(&mut self, plugin: Arc<T>) -> Result<(), PluginError> {
        let name = plugin.name().to_owned();
        if self.entries.iter().any(|p| p.name() == name) {
            return Err(PluginError::AlreadyRegistered { name });
        }
        self.entries.push(plugin);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.iter().find(|p| p.name() == name).cloned()
    }

    fn resolve(&self, name: &str) -> Result<Arc<T>, PluginError> {
        self.get(name).ok_or_else(|| PluginError::NotFound {
            name: name.to_owned(),
        })
    }

    fn infos(&self) -> impl Iterator<Item = &PluginInfo> {
        self.entries.iter().map(|p| p.info())
    }
}

/// 플러그인 레지스트리
///
/// 시작 시점에 모든 플러그인을 이름으로 등록하고, 설정에 나온 이름을
/// 한 번만 구현체로 해석합니다. 유형별로 이름이 유일해야 합니다.
///
/// # 사용 예시
/// ```ignore
/// let mut registry = PluginRegistry::new();
/// registry.register_worker(Arc::new(MagicWorker::new()))?;
/// registry.register_output(Arc::new(StdoutConnector::new(false)))?;
///
/// let worker = registry.resolve_worker("magic")?;
/// ```
pub struct PluginRegistry {
    sources: Slots<dyn DynSource>,
    workers: Slots<dyn DynWorker>,
    outputs: Slots<dyn DynOutput>,
    archives: Slots<dyn DynArchive>,
}

impl PluginRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            sources: Slots::new(),
            workers: Slots::new(),
            outputs: Slots::new(),
            archives: Slots::new(),
        }
    }

    pub fn register_source(&mut self, plugin: Arc<dyn DynSource>) -> Result<(), PluginError> {
        self.sources.register(plugin)
    }

    pub fn register_worker(&mut self, plugin: Arc<dyn DynWorker>) -> Result<(), PluginError> {
        self.workers.register(plugin)
    }

    pub fn register_output(&mut self, plugin: Arc<dyn DynOutput>) -> Result<(), PluginError> {
        self.outputs.register(plugin)
    }

    pub fn register_archive(&mut self, plugin: Arc<dyn DynArchive>) -> Result<(), PluginError> {
        self.archives.register(plugin)
    }

    pub fn source(&self, name: &str) -> Option<Arc<dyn DynSource>> {
        self.sources.get(name)
    }

    pub fn worker(&self, name: &str) -> Option<Arc<dyn DynWorker>> {
        self.workers.get(name)
    }

    pub fn resolve_source(&self, name: &str) -> Result<Arc<dyn DynSource>, PluginError> {
        self.sources.resolve(name)
    }

    pub fn resolve_worker(&self, name: &str) -> Result<Arc<dyn DynWorker>, PluginError> {
        self.workers.resolve(name)
    }

    pub fn resolve_output(&self, name: &str) -> Result<Arc<dyn DynOutput>, PluginError> {
        self.outputs.resolve(name)
    }

    pub fn resolve_archive(&self, name: &str) -> Result<Arc<dyn DynArchive>, PluginError> {
        self.archives.resolve(name)
    }

    /// 등록된 모든 워커를 등록 순서대로 반환합니다.
    pub fn workers(&self) -> Vec<Arc<dyn DynWorker>> {
        self.workers.entries.clone()
    }

    /// 등록된 플러그인 총 수를 반환합니다.
    pub fn count(&self) -> usize {
        self.sources.entries.len()
            + self.workers.entries.len()
            + self.outputs.entries.len()
            + self.archives.entries.len()
    }

    /// 등록된 모든 플러그인의 정보를 유형 순서(source, worker, connector, archive)로 반환합니다.
    pub fn list(&self) -> Vec<&PluginInfo> {
        self.sources
            .infos()
            .chain(self.workers.infos())
            .chain(self.outputs.infos())
            .chain(self.archives.infos())
            .collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockWorker {
        info: PluginInfo,
        fail: bool,
    }

    impl MockWorker {
        fn new(name: &str) -> Self {
            Self {
                info: PluginInfo::new(name, PluginType::Worker, format!("Mock worker: {name}")),
                fail: false,
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl Plugin for MockWorker {
        fn info(&self) -> &PluginInfo {
            &self.info
        }
    }

    impl WorkerPlugin for MockWorker {
        fn dispatch_rules(&self) -> Option<&str> {
            Some("id: mock\ntitle: Mock\nplugins: [mock]\npatterns: []\n")
        }

        async fn run(&self, payload: &Payload) -> Result<WorkerOutput, PluginError> {
            if self.fail {
                return Err(PluginError::failed(self.name(), "mock failure"));
            }
            Ok(WorkerOutput::new(serde_json::json!({ "size": payload.len() })))
        }
    }

    struct MockOutput {
        info: PluginInfo,
        saved: Mutex<Vec<String>>,
    }

    impl Plugin for MockOutput {
        fn info(&self) -> &PluginInfo {
            &self.info
        }
    }

    impl OutputConnector for MockOutput {
        async fn save(&self, record: &ResultRecord) -> Result<(), PluginError> {
            self.saved
                .lock()
                .map_err(|e| PluginError::delivery(self.name(), e.to_string()))?
                .push(record.payload_id.clone());
            Ok(())
        }
    }

    struct MockSource {
        info: PluginInfo,
    }

    impl Plugin for MockSource {
        fn info(&self) -> &PluginInfo {
            &self.info
        }
    }

    impl SourcePlugin for MockSource {
        async fn ingest(
            &self,
            _config: &IngestConfig,
            tx: mpsc::Sender<Payload>,
        ) -> Result<usize, PluginError> {
            for i in 0..3u8 {
                tx.send(Payload::new(vec![i], None))
                    .await
                    .map_err(|e| PluginError::Ingest {
                        name: self.name().to_owned(),
                        reason: e.to_string(),
                    })?;
            }
            Ok(3)
        }
    }

    // ── PluginType / PluginInfo ──

    #[test]
    fn plugin_type_display() {
        assert_eq!(PluginType::Source.to_string(), "source");
        assert_eq!(PluginType::Worker.to_string(), "worker");
        assert_eq!(PluginType::Connector.to_string(), "connector");
        assert_eq!(PluginType::Archive.to_string(), "archive");
    }

    #[test]
    fn plugin_info_serialize_deserialize() {
        let info = PluginInfo::new("magic", PluginType::Worker, "file type detection");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"worker\""));
        let deserialized: PluginInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.name, "magic");
        assert_eq!(deserialized.plugin_type, PluginType::Worker);
    }

    // ── Dyn traits ──

    #[tokio::test]
    async fn dyn_worker_can_be_shared() {
        let worker: Arc<dyn DynWorker> = Arc::new(MockWorker::new("size"));
        let payload = Payload::new(&b"abcd"[..], None);

        let output = worker.run(&payload).await.unwrap();
        assert_eq!(output.body["size"], 4);
        assert!(worker.dispatch_rules().is_some());
        assert_eq!(worker.name(), "size");
    }

    #[tokio::test]
    async fn dyn_worker_propagates_failure() {
        let worker: Arc<dyn DynWorker> = Arc::new(MockWorker::new("bad").failing());
        let payload = Payload::new(&b"abcd"[..], None);
        let err = worker.run(&payload).await.unwrap_err();
        assert!(err.to_string().contains("mock failure"));
    }

    #[tokio::test]
    async fn dyn_output_saves_record() {
        let output = Arc::new(MockOutput {
            info: PluginInfo::new("memory", PluginType::Connector, "in-memory"),
            saved: Mutex::new(Vec::new()),
        });
        let connector: Arc<dyn DynOutput> = output.clone();
        let payload = Payload::new(&b"x"[..], None);
        let record = ResultRecord::for_payload("req", &payload);

        connector.save(&record).await.unwrap();
        assert_eq!(output.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dyn_source_streams_payloads() {
        let source: Arc<dyn DynSource> = Arc::new(MockSource {
            info: PluginInfo::new("mock", PluginType::Source, "three bytes"),
        });
        let (tx, mut rx) = mpsc::channel(1);
        let config = IngestConfig::default();

        let handle = {
            let source = source.clone();
            tokio::spawn(async move { source.ingest(&config, tx).await })
        };

        let mut received = Vec::new();
        while let Some(payload) = rx.recv().await {
            received.push(payload.content()[0]);
        }
        assert_eq!(received, vec![0, 1, 2]);
        assert_eq!(handle.await.unwrap().unwrap(), 3);
    }

    // ── PluginRegistry ──

    #[test]
    fn registry_new_is_empty() {
        let registry = PluginRegistry::new();
        assert_eq!(registry.count(), 0);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn registry_register_duplicate_worker_fails() {
        let mut registry = PluginRegistry::new();
        registry
            .register_worker(Arc::new(MockWorker::new("dup")))
            .unwrap();
        let err = registry
            .register_worker(Arc::new(MockWorker::new("dup")))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert!(err.to_string().contains("dup"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn registry_same_name_in_different_kinds_is_allowed() {
        let mut registry = PluginRegistry::new();
        registry
            .register_worker(Arc::new(MockWorker::new("file")))
            .unwrap();
        registry
            .register_output(Arc::new(MockOutput {
                info: PluginInfo::new("file", PluginType::Connector, "file output"),
                saved: Mutex::new(Vec::new()),
            }))
            .unwrap();
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn registry_resolve_not_found_fails() {
        let registry = PluginRegistry::new();
        let err = registry.resolve_worker("nonexistent").err().unwrap();
        assert!(err.to_string().contains("not found"));
        assert!(err.to_string().contains("nonexistent"));
        assert!(registry.resolve_output("stdout").is_err());
        assert!(registry.resolve_archive("dir").is_err());
        assert!(registry.resolve_source("file").is_err());
    }

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = PluginRegistry::new();
        let names = ["alpha", "beta", "gamma", "delta"];
        for name in &names {
            registry
                .register_worker(Arc::new(MockWorker::new(name)))
                .unwrap();
        }

        let list: Vec<&str> = registry
            .list()
            .iter()
            .map(|info| info.name.as_str())
            .collect();
        assert_eq!(list, names);

        let workers: Vec<String> = registry
            .workers()
            .iter()
            .map(|w| w.name().to_owned())
            .collect();
        assert_eq!(workers, names);
    }

    #[test]
    fn registry_lookup_returns_shared_instance() {
        let mut registry = PluginRegistry::new();
        registry
            .register_worker(Arc::new(MockWorker::new("lookup")))
            .unwrap();
        let a = registry.worker("lookup").unwrap();
        let b = registry.resolve_worker("lookup").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.worker("missing").is_none());
    }
}
