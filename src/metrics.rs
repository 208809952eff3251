use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "facesearch_search_count",
        "count of the face search requests",
        &["method", "matched"]
    )
    .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "facesearch_search_duration",
        "duration of the per-request search in seconds",
        &["method"]
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SIMILARITY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "facesearch_search_max_similarity",
        "max similarity of the per-request search",
        &["method"],
        (0..=20).map(|x| x as f64 * 0.05).collect()
    )
    .unwrap()
});

static METRIC_INGEST_ITEMS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "facesearch_ingest_items",
        "count of the photos handled by the ingestion pipeline",
        &["outcome"]
    )
    .unwrap()
});

/// 记录一次搜索
pub fn inc_search_count(method: &str, matched: bool) {
    METRIC_SEARCH_COUNT.with_label_values(&[method, if matched { "true" } else { "false" }]).inc();
}

pub fn inc_search_duration(method: &str, duration: f32) {
    METRIC_SEARCH_DURATION.with_label_values(&[method]).observe(duration as f64);
}

pub fn inc_search_max_similarity(method: &str, similarity: f32) {
    METRIC_SEARCH_MAX_SIMILARITY.with_label_values(&[method]).observe(similarity as f64);
}

/// outcome 为 processed、no_face 或 failed
pub fn inc_ingest_items(outcome: &str, n: usize) {
    METRIC_INGEST_ITEMS.with_label_values(&[outcome]).inc_by(n as u64);
}

/// 以文本格式导出全部指标
pub fn encode_text() -> anyhow::Result<String> {
    let metric_families = prometheus::gather();
    Ok(TextEncoder::new().encode_to_string(&metric_families)?)
}
