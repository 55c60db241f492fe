//! 결과 라우터 -- 플러그인 결과를 출력 커넥터로, 추출물을 보관 커넥터로 전달
//!
//! - combined: 커넥터마다 페이로드당 하나의 집계 레코드
//! - split: 커넥터마다 플러그인 결과 하나당 하나의 레코드
//!
//! 커넥터 하나의 실패는 [`RouteReport`]에 모이고 다른 커넥터 전달에는
//! 영향을 주지 않습니다.

use std::sync::Arc;

use sifter_core::metrics as m;
use sifter_core::plugin::{DynArchive, DynOutput, PluginRegistry};
use sifter_core::types::{
    ArchiveMetadata, DeliveryMode, Payload, PluginResult, ProcessingRequest, ResultRecord,
};

use crate::config::EngineConfig;
use crate::error::DispatchError;

/// 라우팅 한 번의 결과
#[derive(Debug, Default)]
pub struct RouteReport {
    /// 전달을 시도한 레코드 수 (커넥터별 합계)
    pub attempted: usize,
    /// 커넥터가 받아들인 레코드 수
    pub delivered: usize,
    /// 커넥터별 실패
    pub failures: Vec<DispatchError>,
}

impl RouteReport {
    /// 전달을 시도했으나 어떤 커넥터도 레코드를 받지 않았는지 여부
    pub fn is_total_failure(&self) -> bool {
        self.attempted > 0 && self.delivered == 0
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn merge(&mut self, other: RouteReport) {
        self.attempted += other.attempted;
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
    }
}

/// 결과 라우터
pub struct ResultRouter {
    outputs: Vec<Arc<dyn DynOutput>>,
    archive: Option<Arc<dyn DynArchive>>,
    mode: DeliveryMode,
}

impl ResultRouter {
    pub fn new(
        outputs: Vec<Arc<dyn DynOutput>>,
        archive: Option<Arc<dyn DynArchive>>,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            outputs,
            archive,
            mode,
        }
    }

    /// 설정된 커넥터 이름을 레지스트리에서 해석하여 라우터를 생성합니다.
    ///
    /// 등록되지 않은 커넥터 이름은 시작 시점 에러입니다.
    pub fn from_registry(
        registry: &PluginRegistry,
        config: &EngineConfig,
    ) -> Result<Self, DispatchError> {
        let outputs = config
            .output_connectors
            .iter()
            .map(|name| registry.resolve_output(name))
            .collect::<Result<Vec<_>, _>>()?;
        let archive = config
            .archive_connector
            .as_deref()
            .map(|name| registry.resolve_archive(name))
            .transpose()?;
        Ok(Self::new(outputs, archive, config.delivery))
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn has_archive(&self) -> bool {
        self.archive.is_some()
    }

    /// 전달 방식에 따라 출력 레코드를 만듭니다.
    ///
    /// combined 모드는 결과가 비어 있어도 레코드 하나를 만들고,
    /// split 모드는 결과마다 하나씩 만듭니다.
    pub fn records(
        &self,
        request_id: &str,
        payload: &Payload,
        results: &[PluginResult],
    ) -> Vec<ResultRecord> {
        match self.mode {
            DeliveryMode::Combined => {
                let mut record = ResultRecord::for_payload(request_id, payload);
                for result in results {
                    record.absorb(result);
                }
                vec![record]
            }
            DeliveryMode::Split => results
                .iter()
                .map(|result| {
                    let mut record = ResultRecord::for_payload(request_id, payload);
                    record.plugin = Some(result.plugin.clone());
                    record.absorb(result);
                    record
                })
                .collect(),
        }
    }

    /// 요청의 결과를 모든 출력 커넥터로 전달합니다.
    pub async fn route(
        &self,
        request: &ProcessingRequest,
        results: &[PluginResult],
    ) -> RouteReport {
        let records = self.records(&request.id, &request.payload, results);
        let mut report = RouteReport::default();
        for output in &self.outputs {
            report.merge(deliver(output.as_ref(), &records).await);
        }

        if report.has_failures() {
            tracing::warn!(
                request_id = %request.id,
                delivered = report.delivered,
                failed = report.failures.len(),
                "some records were not delivered"
            );
        }
        report
    }

    /// 추출된 모든 하위 페이로드를 보관 커넥터로 전달합니다.
    ///
    /// 재귀 요청 여부나 전달 방식과 관계없이 모든 추출물이 대상입니다.
    /// 보관 커넥터가 없으면 아무것도 하지 않습니다.
    pub async fn archive(&self, results: &[PluginResult]) -> RouteReport {
        let mut report = RouteReport::default();
        let Some(archive) = &self.archive else {
            return report;
        };

        for result in results {
            for extracted in &result.extracted {
                let child = &extracted.payload;
                let metadata = ArchiveMetadata::for_payload(child, &result.plugin);
                report.attempted += 1;
                match archive.save(child.content(), &metadata).await {
                    Ok(()) => {
                        report.delivered += 1;
                        metrics::counter!(m::PAYLOADS_ARCHIVED_TOTAL).increment(1);
                    }
                    Err(e) => {
                        tracing::warn!(
                            connector = archive.name(),
                            payload_id = child.id(),
                            error = %e,
                            "failed to archive extracted payload"
                        );
                        report.failures.push(DispatchError::Connector {
                            connector: archive.name().to_owned(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        report
    }
}

/// 커넥터 하나에 레코드를 순서대로 전달합니다.
async fn deliver(output: &dyn DynOutput, records: &[ResultRecord]) -> RouteReport {
    let mut report = RouteReport::default();
    for record in records {
        report.attempted += 1;
        match output.save(record).await {
            Ok(()) => {
                report.delivered += 1;
                metrics::counter!(m::RECORDS_DELIVERED_TOTAL, m::LABEL_CONNECTOR => output.name().to_owned())
                    .increment(1);
            }
            Err(e) => {
                metrics::counter!(m::DELIVERY_FAILURES_TOTAL, m::LABEL_CONNECTOR => output.name().to_owned())
                    .increment(1);
                tracing::warn!(
                    connector = output.name(),
                    request_id = %record.request_id,
                    error = %e,
                    "connector rejected record"
                );
                report.failures.push(DispatchError::Connector {
                    connector: output.name().to_owned(),
                    reason: e.to_string(),
                });
            }
        }
    }
    report
}
