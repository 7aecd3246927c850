//! Request counters and latency histograms in Prometheus text format.
//!
//! Two metric families are exported by `GET /metrics`:
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `rag_api_requests_total` | counter | `endpoint`, `outcome` |
//! | `rag_api_request_latency_seconds` | histogram | `endpoint` |
//!
//! Series are created on first use and live for the process lifetime.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REQUESTS_TOTAL: &str = "rag_api_requests_total";
pub const REQUEST_LATENCY_SECONDS: &str = "rag_api_request_latency_seconds";

/// Upper bounds in seconds; `+Inf` is implicit.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

#[derive(Debug)]
struct Histogram {
    /// Non-cumulative counts, one per bucket plus the overflow slot.
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: (0..=LATENCY_BUCKETS.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    fn observe(&self, seconds: f64) {
        let slot = LATENCY_BUCKETS
            .iter()
            .position(|&upper| seconds <= upper)
            .unwrap_or(LATENCY_BUCKETS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    requests: Mutex<BTreeMap<(String, String), Arc<AtomicU64>>>,
    latency: Mutex<BTreeMap<String, Arc<Histogram>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, endpoint: &str, outcome: &str) {
        let counter = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests
                .entry((endpoint.to_string(), outcome.to_string()))
                .or_default()
                .clone()
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, endpoint: &str, elapsed: Duration) {
        let histogram = {
            let mut latency = self.latency.lock().unwrap_or_else(|e| e.into_inner());
            latency
                .entry(endpoint.to_string())
                .or_insert_with(|| Arc::new(Histogram::new()))
                .clone()
        };
        histogram.observe(elapsed.as_secs_f64());
    }

    pub fn request_count(&self, endpoint: &str, outcome: &str) -> u64 {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests
            .get(&(endpoint.to_string(), outcome.to_string()))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render every series in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP {REQUESTS_TOTAL} Total number of requests.");
        let _ = writeln!(out, "# TYPE {REQUESTS_TOTAL} counter");
        {
            let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            for ((endpoint, outcome), counter) in requests.iter() {
                let _ = writeln!(
                    out,
                    "{REQUESTS_TOTAL}{{endpoint=\"{}\",outcome=\"{}\"}} {}",
                    escape_label(endpoint),
                    escape_label(outcome),
                    counter.load(Ordering::Relaxed)
                );
            }
        }

        let _ = writeln!(
            out,
            "# HELP {REQUEST_LATENCY_SECONDS} Latency of requests in seconds."
        );
        let _ = writeln!(out, "# TYPE {REQUEST_LATENCY_SECONDS} histogram");
        let latency = self.latency.lock().unwrap_or_else(|e| e.into_inner());
        for (endpoint, histogram) in latency.iter() {
            let endpoint = escape_label(endpoint);
            let mut cumulative = 0u64;
            for (i, upper) in LATENCY_BUCKETS.iter().enumerate() {
                cumulative += histogram.buckets[i].load(Ordering::Relaxed);
                let _ = writeln!(
                    out,
                    "{REQUEST_LATENCY_SECONDS}_bucket{{endpoint=\"{endpoint}\",le=\"{upper}\"}} {cumulative}"
                );
            }
            cumulative += histogram.buckets[LATENCY_BUCKETS.len()].load(Ordering::Relaxed);
            let _ = writeln!(
                out,
                "{REQUEST_LATENCY_SECONDS}_bucket{{endpoint=\"{endpoint}\",le=\"+Inf\"}} {cumulative}"
            );
            let sum = histogram.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
            let _ = writeln!(
                out,
                "{REQUEST_LATENCY_SECONDS}_sum{{endpoint=\"{endpoint}\"}} {sum}"
            );
            let _ = writeln!(
                out,
                "{REQUEST_LATENCY_SECONDS}_count{{endpoint=\"{endpoint}\"}} {}",
                histogram.count.load(Ordering::Relaxed)
            );
        }

        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_by_label() {
        let metrics = Metrics::new();
        metrics.record_request("query", "answered");
        metrics.record_request("query", "answered");
        metrics.record_request("query", "rate_limited");

        assert_eq!(metrics.request_count("query", "answered"), 2);
        assert_eq!(metrics.request_count("query", "rate_limited"), 1);
        assert_eq!(metrics.request_count("query", "error"), 0);

        let text = metrics.render();
        assert!(text.contains("# TYPE rag_api_requests_total counter"));
        assert!(text.contains("rag_api_requests_total{endpoint=\"query\",outcome=\"answered\"} 2"));
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let metrics = Metrics::new();
        metrics.observe_latency("query", Duration::from_millis(3));
        metrics.observe_latency("query", Duration::from_millis(300));
        metrics.observe_latency("query", Duration::from_secs(60));

        let text = metrics.render();
        assert!(text.contains("rag_api_request_latency_seconds_bucket{endpoint=\"query\",le=\"0.005\"} 1"));
        assert!(text.contains("rag_api_request_latency_seconds_bucket{endpoint=\"query\",le=\"0.5\"} 2"));
        assert!(text.contains("rag_api_request_latency_seconds_bucket{endpoint=\"query\",le=\"10\"} 2"));
        assert!(text.contains("rag_api_request_latency_seconds_bucket{endpoint=\"query\",le=\"+Inf\"} 3"));
        assert!(text.contains("rag_api_request_latency_seconds_count{endpoint=\"query\"} 3"));
    }

    #[test]
    fn test_empty_registry_still_declares_families() {
        let text = Metrics::new().render();
        assert!(text.contains("# TYPE rag_api_request_latency_seconds histogram"));
        assert!(!text.contains("_bucket"));
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape_label("a\"b\\c"), "a\\\"b\\\\c");
    }
}
