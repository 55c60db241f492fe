//! 엔진 -- 수집부터 라우팅까지 전체 흐름을 관리합니다.
//!
//! # 내부 아키텍처
//! ```text
//! Source -> mpsc -> Tagger -> lineage 작업 큐 -> Dispatcher -> ResultRouter -> Connectors
//!                                   ^                |               \
//!                                   +--- children ---+                ErrorChannel
//! ```
//!
//! 최상위 페이로드 하나와 그 하위 페이로드 전체가 하나의 lineage입니다.
//! lineage는 명시적 작업 큐로 처리되므로 재귀 깊이가 호출 스택에 쌓이지 않습니다.
//! 동시에 처리되는 lineage 수는 `max_processes`로 제한되며, 플러그인 실행용
//! 세마포어와는 별개입니다.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

use sifter_core::config::IngestConfig;
use sifter_core::error::PluginError;
use sifter_core::metrics as m;
use sifter_core::plugin::{DynSource, PluginRegistry};
use sifter_core::types::Payload;

use crate::config::EngineConfig;
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::DispatchError;
use crate::error_queue::{ErrorChannel, ErrorQueue, FailureReason, JsonlErrorQueue};
use crate::router::ResultRouter;
use crate::rule::RuleMatcher;
use crate::tagging::Tagger;

/// 레이트 리밋 재시도 최소 대기 시간
const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

/// 실행 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// 소스에서 수집된 최상위 페이로드 수
    pub ingested: usize,
    /// 디스패치된 페이로드 수 (하위 페이로드 포함)
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 정책에 의해 버려진 페이로드 수
    pub dropped: usize,
    /// 대상 플러그인을 찾지 못한 페이로드 수
    pub unmatched: usize,
    /// 레이트 리밋으로 재시도한 횟수
    pub rate_limited: usize,
    /// 커넥터에 전달된 레코드 수
    pub delivered: usize,
    /// 커넥터 전달 실패 수
    pub delivery_failures: usize,
    /// 보관된 추출물 수
    pub archived: usize,
    /// 에러 큐에 기록된 요청 수
    pub queued: usize,
}

impl RunStats {
    /// 다른 통계를 합칩니다.
    pub fn merge(&mut self, other: &RunStats) {
        self.ingested += other.ingested;
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.dropped += other.dropped;
        self.unmatched += other.unmatched;
        self.rate_limited += other.rate_limited;
        self.delivered += other.delivered;
        self.delivery_failures += other.delivery_failures;
        self.archived += other.archived;
        self.queued += other.queued;
    }

    fn absorb(&mut self, dispatch: &Dispatch) {
        self.processed += 1;
        for result in &dispatch.results {
            if result.outcome.is_success() {
                self.succeeded += 1;
            } else if result.outcome.is_failed() {
                self.failed += 1;
            } else {
                self.skipped += 1;
            }
        }
    }
}

/// 디스패치 엔진
///
/// 내부 상태는 모두 공유 참조이므로 복제 비용이 작고,
/// 복제본은 같은 디스패처, 라우터, 에러 채널을 사용합니다.
///
/// # 사용 예시
/// ```ignore
/// let engine = EngineBuilder::new()
///     .config(config)
///     .registry(registry)
///     .build()
///     .await?;
///
/// let stats = engine.run(source, &ingest_config).await?;
/// ```
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    dispatcher: Arc<Dispatcher>,
    router: Arc<ResultRouter>,
    tagger: Arc<Tagger>,
    errors: ErrorChannel,
    /// 동시 처리 lineage 제한
    lineages: Arc<Semaphore>,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn error_channel(&self) -> &ErrorChannel {
        &self.errors
    }

    /// 소스 플러그인이 만드는 모든 페이로드를 처리합니다.
    ///
    /// 소스는 별도 태스크에서 bounded 채널로 페이로드를 보내고,
    /// 엔진은 받은 페이로드마다 lineage 태스크를 시작합니다.
    ///
    /// # Errors
    /// 에러 큐 기록 실패와 소스 실패는 치명적이며 실행을 중단합니다.
    pub async fn run(
        &self,
        source: Arc<dyn DynSource>,
        ingest: &IngestConfig,
    ) -> Result<RunStats, DispatchError> {
        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity);
        let ingest = ingest.clone();
        let source_name = source.name().to_owned();
        let mut source_task = tokio::spawn(async move { source.ingest(&ingest, tx).await });

        tracing::info!(source = %source_name, "engine started");

        let mut tasks = JoinSet::new();
        let mut stats = RunStats::default();

        let outcome = loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(payload) = received else {
                        break Ok(());
                    };
                    let permit = match Arc::clone(&self.lineages).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break Err(DispatchError::Task("lineage pool closed".to_owned())),
                    };
                    let engine = self.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        engine.submit(payload).await
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = collect(joined, &mut stats) {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = outcome {
            tasks.abort_all();
            drop(rx);
            settle_source(&source_name, source_task).await;
            return Err(e);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = collect(joined, &mut stats) {
                tasks.abort_all();
                drop(rx);
                settle_source(&source_name, source_task).await;
                return Err(e);
            }
        }

        let sent = match (&mut source_task).await {
            Ok(result) => result?,
            Err(e) => {
                return Err(DispatchError::Task(format!(
                    "source '{source_name}' task failed: {e}"
                )));
            }
        };

        tracing::info!(
            source = %source_name,
            sent,
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            queued = stats.queued,
            "engine finished"
        );
        Ok(stats)
    }

    /// 수집된 최상위 페이로드 하나를 태깅하고 lineage 전체를 처리합니다.
    pub async fn submit(&self, payload: Payload) -> Result<RunStats, DispatchError> {
        metrics::counter!(m::PAYLOADS_INGESTED_TOTAL).increment(1);
        let payload = self.tagger.apply(&payload);
        let mut stats = self.process_lineage(payload).await?;
        stats.ingested += 1;
        Ok(stats)
    }

    /// lineage 하나를 작업 큐로 처리합니다.
    ///
    /// 하위 페이로드는 부모의 라우팅이 끝난 뒤 큐에 추가됩니다.
    async fn process_lineage(&self, root: Payload) -> Result<RunStats, DispatchError> {
        let lineage_id = root.lineage_id().to_owned();
        let mut stats = RunStats::default();
        let mut queue = VecDeque::from([root]);

        while let Some(payload) = queue.pop_front() {
            let dispatch = match self.dispatch_admitted(payload.clone(), &mut stats).await {
                Ok(dispatch) => dispatch,
                Err(DispatchError::NoPluginMatched { payload_id }) => {
                    stats.unmatched += 1;
                    tracing::info!(%payload_id, "no plugin matched payload");
                    let request = self.dispatcher.request(payload, Vec::new());
                    if self
                        .errors
                        .enqueue(&request, FailureReason::NoPluginMatched, "no plugin matched")
                        .await?
                    {
                        stats.queued += 1;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            stats.absorb(&dispatch);
            if dispatch.is_dropped() {
                stats.dropped += 1;
                continue;
            }

            let archived = self.router.archive(&dispatch.results).await;
            stats.archived += archived.delivered;

            let routed = self.router.route(&dispatch.request, &dispatch.results).await;
            stats.delivered += routed.delivered;
            stats.delivery_failures += routed.failures.len();

            let failure = if dispatch.all_failed() {
                Some((FailureReason::AllPluginsFailed, "every plugin failed".to_owned()))
            } else if routed.is_total_failure() {
                let detail = routed
                    .failures
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                Some((FailureReason::DeliveryFailed, detail))
            } else {
                None
            };
            if let Some((reason, detail)) = failure {
                if self.errors.enqueue(&dispatch.request, reason, &detail).await? {
                    stats.queued += 1;
                }
            }

            queue.extend(dispatch.children().cloned());
        }

        tracing::debug!(
            %lineage_id,
            processed = stats.processed,
            "lineage completed"
        );
        Ok(stats)
    }

    /// 레이트 리밋에 걸리면 윈도우가 끝날 때까지 기다렸다가 다시 시도합니다.
    async fn dispatch_admitted(
        &self,
        payload: Payload,
        stats: &mut RunStats,
    ) -> Result<Dispatch, DispatchError> {
        loop {
            match self.dispatcher.process(payload.clone()).await {
                Err(DispatchError::RateLimitExceeded { retry_after }) => {
                    stats.rate_limited += 1;
                    tracing::debug!(
                        payload_id = payload.id(),
                        retry_after_ms = retry_after.as_millis() as u64,
                        "rate limited, waiting for next window"
                    );
                    tokio::time::sleep(retry_after.max(MIN_RETRY_DELAY)).await;
                }
                other => return other,
            }
        }
    }
}

fn collect(
    joined: Result<Result<RunStats, DispatchError>, tokio::task::JoinError>,
    stats: &mut RunStats,
) -> Result<(), DispatchError> {
    match joined {
        Ok(Ok(lineage)) => {
            stats.merge(&lineage);
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "lineage aborted");
            Err(e)
        }
        Err(e) => {
            tracing::error!(error = %e, "lineage task failed");
            Err(DispatchError::Task(format!("lineage task failed: {e}")))
        }
    }
}

/// 치명적 오류 후 소스가 보내지 못한 페이로드를 정리하고 끝날 때까지 기다립니다.
///
/// 수신 채널이 닫힌 뒤에 호출되므로 소스의 다음 전송은 곧바로 실패합니다.
async fn settle_source(
    source_name: &str,
    source_task: tokio::task::JoinHandle<Result<usize, PluginError>>,
) {
    match source_task.await {
        Ok(Ok(sent)) => tracing::debug!(source = %source_name, sent, "source finished"),
        Ok(Err(e)) => tracing::warn!(source = %source_name, error = %e, "source stopped"),
        Err(e) => tracing::warn!(source = %source_name, error = %e, "source task failed"),
    }
}

/// 엔진 빌더
///
/// 규칙 로딩(파일 + 워커 선언 규칙), 커넥터 해석, 에러 큐 구성을 수행합니다.
pub struct EngineBuilder {
    config: EngineConfig,
    registry: Option<Arc<PluginRegistry>>,
    matcher: Option<RuleMatcher>,
    error_queue: Option<Arc<dyn ErrorQueue>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: None,
            matcher: None,
            error_queue: None,
        }
    }

    /// 엔진 설정을 지정합니다.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// 플러그인 레지스트리를 지정합니다.
    pub fn registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 미리 구성된 규칙 매처를 사용합니다.
    ///
    /// 설정된 규칙 경로와 워커 선언 규칙은 이 매처에 추가로 로드됩니다.
    pub fn matcher(mut self, matcher: RuleMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// 에러 큐 저장소를 지정합니다.
    ///
    /// 지정하지 않고 설정에서 에러 큐가 켜져 있으면 `error_queue_path`의
    /// JSON Lines 큐를 사용합니다.
    pub fn error_queue(mut self, queue: Arc<dyn ErrorQueue>) -> Self {
        self.error_queue = Some(queue);
        self
    }

    /// 엔진을 빌드합니다.
    ///
    /// # Errors
    /// - 설정 검증 실패, 잘못된 메타데이터
    /// - 규칙 로딩 실패 (`RuleLoad`, `RuleValidation`)
    /// - 등록되지 않은 출력/보관 커넥터
    pub async fn build(self) -> Result<Engine, DispatchError> {
        self.config.validate()?;
        let registry = self.registry.unwrap_or_default();

        let mut matcher = self
            .matcher
            .unwrap_or_default()
            .with_enabled(self.config.auto_dispatch);
        if self.config.auto_dispatch {
            if let Some(path) = &self.config.rules_path {
                matcher.load_path(path).await?;
            }
            for worker in registry.workers() {
                matcher.load_worker_rules(worker.as_ref())?;
            }
        }

        for name in &self.config.workers {
            if registry.worker(name).is_none() {
                tracing::warn!(plugin = %name, "configured worker is not registered");
            }
        }

        let tagger = Tagger::new(self.config.tlp, &self.config.metadata)?;
        let router = ResultRouter::from_registry(&registry, &self.config)?;

        let errors = match (self.error_queue, self.config.error_queue) {
            (Some(queue), true) => ErrorChannel::new(queue),
            (None, true) => ErrorChannel::new(Arc::new(JsonlErrorQueue::new(
                self.config.error_queue_path.clone(),
            ))),
            (_, false) => ErrorChannel::disabled(),
        };

        tracing::info!(
            rules = matcher.rule_count(),
            auto_dispatch = self.config.auto_dispatch,
            outputs = router.output_count(),
            archive = router.has_archive(),
            mode = %router.mode(),
            error_queue = errors.is_enabled(),
            "engine built"
        );

        let dispatcher = Dispatcher::new(&self.config, Arc::new(matcher), registry);
        Ok(Engine {
            lineages: Arc::new(Semaphore::new(self.config.max_processes)),
            config: Arc::new(self.config),
            dispatcher: Arc::new(dispatcher),
            router: Arc::new(router),
            tagger: Arc::new(tagger),
            errors,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
