//! Prometheus metrics (§1.1 ambient stack), mirroring the teacher's
//! `core::metrics` registry: cache hit/miss, extractor fallback outcomes,
//! and compression outcomes. `dorabot` exposes these over an HTTP endpoint
//! the way the teacher's `core::metrics_server` does.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec};

static CACHE_LOOKUPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("doradura_cache_lookups_total", "File-cache lookups by result", &["result"])
        .expect("doradura_cache_lookups_total: duplicate metric registration")
});

static EXTRACT_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "doradura_extract_outcomes_total",
        "Extraction attempts by outcome (success, or the classified failure)",
        &["outcome"]
    )
    .expect("doradura_extract_outcomes_total: duplicate metric registration")
});

static COMPRESSION_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "doradura_compression_outcomes_total",
        "Video compression attempts by outcome (success/failure)",
        &["outcome"]
    )
    .expect("doradura_compression_outcomes_total: duplicate metric registration")
});

pub fn record_cache_hit() {
    CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
}

pub fn record_cache_miss() {
    CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
}

pub fn record_extract_outcome(outcome: &str) {
    EXTRACT_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_compression_outcome(outcome: &str) {
    COMPRESSION_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Render every registered metric family in Prometheus text exposition
/// format, for a caller (e.g. `dorabot`'s metrics HTTP endpoint) to serve.
pub fn encode_to_string() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).ok();
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_and_miss_increment_distinct_label_values() {
        let before_hit = CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).get();
        let before_miss = CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).get();
        record_cache_hit();
        record_cache_miss();
        assert_eq!(CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).get(), before_hit + 1.0);
        assert_eq!(CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).get(), before_miss + 1.0);
    }

    #[test]
    fn encode_to_string_includes_registered_families() {
        record_extract_outcome("success");
        let text = encode_to_string();
        assert!(text.contains("doradura_extract_outcomes_total"));
    }
}
