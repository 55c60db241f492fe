//! 디스패처 -- 페이로드 하나에 대한 대상 결정과 워커 실행
//!
//! [`Dispatcher::process`]의 처리 순서:
//! 1. 레이트 리미터 확인 (거부 시 `RateLimitExceeded`)
//! 2. 대상 결정: 규칙 매칭 → 명시적 워커 목록 → [`NoMatchPolicy`]
//! 3. 대상마다 재귀 가드 확인 (거부 시 `Skipped` 결과)
//! 4. 공유 세마포어 아래에서 워커 동시 실행, 실패는 해당 결과에만 기록
//! 5. 모든 대상이 끝나면 대상 순서대로 결과 반환
//!
//! 추출된 하위 페이로드는 여기서 재귀 처리하지 않습니다.
//! 엔진이 작업 큐에 넣어 새 `process()` 호출로 처리합니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use sifter_core::error::PluginError;
use sifter_core::metrics as m;
use sifter_core::plugin::{DynWorker, PluginRegistry};
use sifter_core::types::{Payload, PluginResult, ProcessingRequest, SkipReason};

use crate::config::{EngineConfig, NoMatchPolicy};
use crate::error::DispatchError;
use crate::guard::RecursionGuard;
use crate::rate_limit::RateLimiter;
use crate::rule::RuleMatcher;

/// `process()` 한 번의 결과
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// 이번 디스패치 시도의 처리 요청
    pub request: ProcessingRequest,
    /// 대상 순서대로 정렬된 플러그인 결과
    pub results: Vec<PluginResult>,
}

impl Dispatch {
    /// 재귀 디스패치가 요청된 하위 페이로드
    pub fn children(&self) -> impl Iterator<Item = &Payload> {
        self.results
            .iter()
            .flat_map(|r| r.extracted.iter())
            .filter(|e| e.dispatch)
            .map(|e| &e.payload)
    }

    /// 실행된 플러그인이 하나 이상 있고 모두 실패했는지 여부
    ///
    /// 스킵된 결과는 실행된 것으로 보지 않습니다.
    pub fn all_failed(&self) -> bool {
        let executed: Vec<_> = self
            .results
            .iter()
            .filter(|r| !r.outcome.is_skipped())
            .collect();
        !executed.is_empty() && executed.iter().all(|r| r.outcome.is_failed())
    }

    /// 정책에 의해 버려졌는지 여부 (대상 없음)
    pub fn is_dropped(&self) -> bool {
        self.request.targets.is_empty()
    }
}

/// 디스패처
///
/// 시작 시점에 구성된 뒤에는 공유 참조로만 사용되며, 여러 lineage에서
/// 동시에 `process()`를 호출할 수 있습니다.
pub struct Dispatcher {
    matcher: Arc<RuleMatcher>,
    registry: Arc<PluginRegistry>,
    guard: RecursionGuard,
    limiter: Option<RateLimiter>,
    /// 플러그인 동시 실행 제한
    permits: Arc<Semaphore>,
    workers: Vec<String>,
    policy: NoMatchPolicy,
    plugin_timeout: Option<Duration>,
    output_connectors: Vec<String>,
    archive_connector: Option<String>,
    error_queue: bool,
}

impl Dispatcher {
    /// 설정, 규칙 매처, 플러그인 레지스트리로 디스패처를 생성합니다.
    pub fn new(
        config: &EngineConfig,
        matcher: Arc<RuleMatcher>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            matcher,
            registry,
            guard: RecursionGuard::new(config.max_recursion),
            limiter: config.rate_limit.map(RateLimiter::new),
            permits: Arc::new(Semaphore::new(config.max_processes)),
            workers: config.workers.clone(),
            policy: config.no_match_policy.clone(),
            plugin_timeout: config.plugin_timeout,
            output_connectors: config.output_connectors.clone(),
            archive_connector: config.archive_connector.clone(),
            error_queue: config.error_queue,
        }
    }

    pub fn guard(&self) -> RecursionGuard {
        self.guard
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// 페이로드와 대상 목록으로 처리 요청을 생성합니다.
    pub fn request(&self, payload: Payload, targets: Vec<String>) -> ProcessingRequest {
        ProcessingRequest {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            targets,
            output_connectors: self.output_connectors.clone(),
            archive_connector: self.archive_connector.clone(),
            error_queue: self.error_queue,
        }
    }

    /// 페이로드를 처리할 워커 이름 목록을 결정합니다.
    ///
    /// 규칙 매칭 결과가 있으면 그것을, 없으면 명시적 워커 목록을 사용합니다.
    /// 둘 다 비어 있으면 정책을 따릅니다. `Drop` 정책은 빈 목록을 반환합니다.
    pub fn resolve_targets(&self, payload: &Payload) -> Result<Vec<String>, DispatchError> {
        let matched = self.matcher.match_payload(payload);
        if !matched.is_empty() {
            metrics::counter!(m::RULE_MATCHES_TOTAL).increment(matched.len() as u64);
            tracing::debug!(
                payload_id = payload.id(),
                plugins = ?matched,
                "dispatch rules matched"
            );
            return Ok(matched.into_iter().collect());
        }

        if !self.workers.is_empty() {
            return Ok(self.workers.clone());
        }

        match &self.policy {
            NoMatchPolicy::Error => Err(DispatchError::NoPluginMatched {
                payload_id: payload.id().to_owned(),
            }),
            NoMatchPolicy::Drop => {
                tracing::debug!(payload_id = payload.id(), "no plugin matched, dropping payload");
                Ok(Vec::new())
            }
            NoMatchPolicy::Default(plugin) => Ok(vec![plugin.clone()]),
        }
    }

    /// 페이로드 하나를 디스패치하고 모든 대상의 결과를 반환합니다.
    ///
    /// # Errors
    /// - `RateLimitExceeded`: 현재 윈도우의 허용 수를 모두 사용함
    /// - `NoPluginMatched`: 대상이 없고 정책이 `Error`
    ///
    /// 플러그인 실패, 타임아웃, 패닉, 등록되지 않은 이름은 에러가 아니라
    /// 해당 대상의 `Failed` 결과로 기록됩니다.
    pub async fn process(&self, payload: Payload) -> Result<Dispatch, DispatchError> {
        if let Some(limiter) = &self.limiter {
            if let Err(e) = limiter.try_admit() {
                metrics::counter!(m::RATE_LIMITED_TOTAL).increment(1);
                return Err(e);
            }
        }

        let targets = self.resolve_targets(&payload)?;
        let request = self.request(payload, targets);
        metrics::counter!(m::PAYLOADS_PROCESSED_TOTAL).increment(1);

        let results = self.execute(&request).await;

        tracing::debug!(
            request_id = %request.id,
            payload_id = request.payload.id(),
            depth = request.payload.depth(),
            targets = request.targets.len(),
            "dispatch completed"
        );
        Ok(Dispatch { request, results })
    }

    /// 모든 대상을 실행하고 대상 순서대로 결과를 모읍니다.
    async fn execute(&self, request: &ProcessingRequest) -> Vec<PluginResult> {
        let payload = &request.payload;
        let depth = payload.depth();

        let mut slots = Vec::with_capacity(request.targets.len());
        for target in &request.targets {
            if !self.guard.allow(depth) {
                metrics::counter!(m::RECURSION_SKIPS_TOTAL).increment(1);
                tracing::debug!(
                    payload_id = payload.id(),
                    plugin = %target,
                    depth,
                    max = self.guard.max_recursion(),
                    "recursion limit reached, skipping plugin"
                );
                slots.push(Slot::Done(PluginResult::skipped(
                    &request.id,
                    target,
                    payload,
                    SkipReason::RecursionLimitReached {
                        depth,
                        max: self.guard.max_recursion(),
                    },
                )));
                continue;
            }

            let Some(worker) = self.registry.worker(target) else {
                let reason = PluginError::NotFound {
                    name: target.clone(),
                }
                .to_string();
                record_invocation(target, "failed");
                tracing::warn!(payload_id = payload.id(), plugin = %target, "unknown worker plugin");
                slots.push(Slot::Done(PluginResult::failed(&request.id, target, payload, reason)));
                continue;
            };

            let handle = tokio::spawn(invoke(
                worker,
                Arc::clone(&self.permits),
                request.id.clone(),
                payload.clone(),
                self.plugin_timeout,
            ));
            slots.push(Slot::Running(target.clone(), handle));
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let result = match slot {
                Slot::Done(result) => result,
                Slot::Running(plugin, handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        record_invocation(&plugin, "failed");
                        let reason = if e.is_panic() {
                            format!("plugin '{plugin}' panicked")
                        } else {
                            format!("plugin '{plugin}' task cancelled")
                        };
                        tracing::error!(payload_id = payload.id(), %plugin, "{reason}");
                        PluginResult::failed(&request.id, &plugin, payload, reason)
                    }
                },
            };
            results.push(result);
        }
        results
    }
}

/// 대상 하나의 실행 상태
enum Slot {
    Done(PluginResult),
    Running(String, tokio::task::JoinHandle<PluginResult>),
}

/// 세마포어 허가를 얻은 뒤 워커 하나를 실행합니다.
async fn invoke(
    worker: Arc<dyn DynWorker>,
    permits: Arc<Semaphore>,
    request_id: String,
    payload: Payload,
    timeout: Option<Duration>,
) -> PluginResult {
    let plugin = worker.name().to_owned();

    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            record_invocation(&plugin, "failed");
            return PluginResult::failed(
                &request_id,
                &plugin,
                &payload,
                "worker pool closed".to_owned(),
            );
        }
    };

    let started = Instant::now();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, worker.run(&payload)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PluginError::Timeout {
                name: plugin.clone(),
                secs: limit.as_secs(),
            }),
        },
        None => worker.run(&payload).await,
    };
    metrics::histogram!(m::PLUGIN_DURATION_SECONDS, m::LABEL_PLUGIN => plugin.clone())
        .record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(output) => {
            record_invocation(&plugin, "success");
            tracing::debug!(
                payload_id = payload.id(),
                %plugin,
                extracted = output.extracted.len(),
                "plugin completed"
            );
            PluginResult::success(&request_id, &plugin, &payload, output)
        }
        Err(e) => {
            record_invocation(&plugin, "failed");
            tracing::warn!(payload_id = payload.id(), %plugin, error = %e, "plugin failed");
            PluginResult::failed(&request_id, &plugin, &payload, e.to_string())
        }
    }
}

fn record_invocation(plugin: &str, result: &'static str) {
    metrics::counter!(
        m::PLUGIN_INVOCATIONS_TOTAL,
        m::LABEL_PLUGIN => plugin.to_owned(),
        m::LABEL_RESULT => result
    )
    .increment(1);
}
