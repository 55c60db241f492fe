//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()` 매크로를 호출합니다.
//! 레코더가 설치되지 않은 경우 기록은 무시됩니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `sifter_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(sifter_core::metrics::PAYLOADS_INGESTED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 플러그인 이름 레이블 키
pub const LABEL_PLUGIN: &str = "plugin";

/// 결과 레이블 키 (success, failed, skipped)
pub const LABEL_RESULT: &str = "result";

/// 커넥터 이름 레이블 키
pub const LABEL_CONNECTOR: &str = "connector";

/// 실패 사유 레이블 키
pub const LABEL_REASON: &str = "reason";

// ─── 수집 / 디스패치 ────────────────────────────────────────────────

/// 수집된 페이로드 수 (counter)
pub const PAYLOADS_INGESTED_TOTAL: &str = "sifter_payloads_ingested_total";

/// `process()`를 통과한 페이로드 수, 하위 페이로드 포함 (counter)
pub const PAYLOADS_PROCESSED_TOTAL: &str = "sifter_payloads_processed_total";

/// 규칙 매칭으로 선택된 플러그인 수 (counter)
pub const RULE_MATCHES_TOTAL: &str = "sifter_rule_matches_total";

/// 플러그인 호출 수 (counter, labels: plugin, result)
pub const PLUGIN_INVOCATIONS_TOTAL: &str = "sifter_plugin_invocations_total";

/// 플러그인 실행 시간 (histogram, 초, label: plugin)
pub const PLUGIN_DURATION_SECONDS: &str = "sifter_plugin_duration_seconds";

/// 재귀 한도로 건너뛴 플러그인 수 (counter)
pub const RECURSION_SKIPS_TOTAL: &str = "sifter_recursion_skips_total";

/// 레이트 리밋으로 거부된 요청 수 (counter)
pub const RATE_LIMITED_TOTAL: &str = "sifter_rate_limited_total";

// ─── 라우팅 ─────────────────────────────────────────────────────────

/// 커넥터에 전달된 레코드 수 (counter, label: connector)
pub const RECORDS_DELIVERED_TOTAL: &str = "sifter_records_delivered_total";

/// 커넥터 전달 실패 수 (counter, label: connector)
pub const DELIVERY_FAILURES_TOTAL: &str = "sifter_delivery_failures_total";

/// 보관된 하위 페이로드 수 (counter)
pub const PAYLOADS_ARCHIVED_TOTAL: &str = "sifter_payloads_archived_total";

/// 에러 큐에 기록된 요청 수 (counter, label: reason)
pub const ERROR_QUEUE_ENTRIES_TOTAL: &str = "sifter_error_queue_entries_total";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 플러그인 실행 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 60s 범위
pub const PLUGIN_DURATION_BUCKETS: [f64; 9] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0, 60.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 실행 시작 시 호출합니다. 전역 레코더가 없으면 아무 일도 하지 않고,
/// 여러 번 호출해도 같은 설명이 다시 등록될 뿐입니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        PAYLOADS_INGESTED_TOTAL,
        "Total number of payloads produced by the source plugin"
    );
    describe_counter!(
        PAYLOADS_PROCESSED_TOTAL,
        "Total number of payloads admitted for dispatch, including extracted children"
    );
    describe_counter!(
        RULE_MATCHES_TOTAL,
        "Total number of plugins selected by dispatch rules"
    );
    describe_counter!(
        PLUGIN_INVOCATIONS_TOTAL,
        "Plugin invocations by plugin name and outcome"
    );
    describe_histogram!(
        PLUGIN_DURATION_SECONDS,
        "Time spent in a single worker plugin invocation in seconds"
    );
    describe_counter!(
        RECURSION_SKIPS_TOTAL,
        "Total number of plugin targets skipped by the recursion ceiling"
    );
    describe_counter!(
        RATE_LIMITED_TOTAL,
        "Total number of dispatch attempts denied by the rate limiter"
    );
    describe_counter!(
        RECORDS_DELIVERED_TOTAL,
        "Total number of result records accepted by output connectors"
    );
    describe_counter!(
        DELIVERY_FAILURES_TOTAL,
        "Total number of result records rejected by output connectors"
    );
    describe_counter!(
        PAYLOADS_ARCHIVED_TOTAL,
        "Total number of extracted payloads handed to the archive connector"
    );
    describe_counter!(
        ERROR_QUEUE_ENTRIES_TOTAL,
        "Total number of terminally failed requests written to the error queue"
    );
}
