//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `grove_`
//! - 단계명: `ideal_`, `reify_`, `audit_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(grove_core::metrics::REIFY_ACTIONS_TOTAL, "action" => "add").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 심각도 레이블 키 (info, low, moderate, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

/// diff 액션 레이블 키 (add, remove, change)
pub const LABEL_ACTION: &str = "action";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Ideal Tree 메트릭 ─────────────────────────────────────────────

/// Ideal: 배치된 노드 수 (counter)
pub const IDEAL_NODES_PLACED_TOTAL: &str = "grove_ideal_nodes_placed_total";

/// Ideal: 조회한 packument 수 (counter)
pub const IDEAL_PACKUMENTS_FETCHED_TOTAL: &str = "grove_ideal_packuments_fetched_total";

/// Ideal: dedup 으로 제거된 노드 수 (counter)
pub const IDEAL_NODES_DEDUPED_TOTAL: &str = "grove_ideal_nodes_deduped_total";

/// Ideal: 미해결 의존성 수 (gauge)
pub const IDEAL_UNRESOLVED_EDGES: &str = "grove_ideal_unresolved_edges";

/// Ideal: 트리 구성 소요 시간 (histogram, 초)
pub const IDEAL_BUILD_DURATION_SECONDS: &str = "grove_ideal_build_duration_seconds";

// ─── Reify 메트릭 ──────────────────────────────────────────────────

/// Reify: 실행된 diff 리프 수 (counter, label: action, result)
pub const REIFY_ACTIONS_TOTAL: &str = "grove_reify_actions_total";

/// Reify: 가져온 아티팩트 바이트 수 (counter)
pub const REIFY_FETCHED_BYTES_TOTAL: &str = "grove_reify_fetched_bytes_total";

/// Reify: 캐시 적중 수 (counter)
pub const REIFY_CACHE_HITS_TOTAL: &str = "grove_reify_cache_hits_total";

/// Reify: 무결성 불일치 수 (counter)
pub const REIFY_INTEGRITY_FAILURES_TOTAL: &str = "grove_reify_integrity_failures_total";

/// Reify: 전체 반영 소요 시간 (histogram, 초)
pub const REIFY_DURATION_SECONDS: &str = "grove_reify_duration_seconds";

// ─── Audit 메트릭 ──────────────────────────────────────────────────

/// Audit: 발견된 취약점 수 (counter, label: severity)
pub const AUDIT_VULNS_FOUND_TOTAL: &str = "grove_audit_vulns_found_total";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Ideal Tree
    describe_counter!(
        IDEAL_NODES_PLACED_TOTAL,
        "Total number of nodes placed while building the ideal tree"
    );
    describe_counter!(
        IDEAL_PACKUMENTS_FETCHED_TOTAL,
        "Total number of packuments requested from the metadata provider"
    );
    describe_counter!(
        IDEAL_NODES_DEDUPED_TOTAL,
        "Total number of redundant nodes removed by deduplication"
    );
    describe_gauge!(
        IDEAL_UNRESOLVED_EDGES,
        "Number of required edges left unresolved by the last build"
    );
    describe_histogram!(
        IDEAL_BUILD_DURATION_SECONDS,
        "Time to build an ideal tree in seconds"
    );

    // Reify
    describe_counter!(
        REIFY_ACTIONS_TOTAL,
        "Diff leaves applied to the filesystem, by action and result"
    );
    describe_counter!(
        REIFY_FETCHED_BYTES_TOTAL,
        "Total artifact bytes fetched during reification"
    );
    describe_counter!(
        REIFY_CACHE_HITS_TOTAL,
        "Artifacts served from the local content cache"
    );
    describe_counter!(
        REIFY_INTEGRITY_FAILURES_TOTAL,
        "Artifacts rejected because their digest did not match"
    );
    describe_histogram!(
        REIFY_DURATION_SECONDS,
        "Time to apply a diff to the filesystem in seconds"
    );

    // Audit
    describe_counter!(
        AUDIT_VULNS_FOUND_TOTAL,
        "Vulnerabilities found by audit, by severity"
    );
}
