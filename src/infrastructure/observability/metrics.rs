//! Prometheus metrics infrastructure

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::config::MetricsConfig;

/// Prometheus metrics handle for rendering the exposition text
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Get the metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Initialize Prometheus metrics
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::debug!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("tiered_cache_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
            tracing::debug!("Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

/// Cache tier a lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Near,
    Distributed,
    BackingStore,
}

impl CacheTier {
    fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Near => "near",
            CacheTier::Distributed => "distributed",
            CacheTier::BackingStore => "backing_store",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Hit,
    Miss,
    Error,
}

impl LookupOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::Hit => "hit",
            LookupOutcome::Miss => "miss",
            LookupOutcome::Error => "error",
        }
    }
}

/// Record the outcome of looking up `count` keys in one tier
pub fn record_tier_lookup(cache: &str, tier: CacheTier, outcome: LookupOutcome, count: u64) {
    if count == 0 {
        return;
    }

    let labels = [
        ("cache", cache.to_string()),
        ("tier", tier.as_str().to_string()),
        ("outcome", outcome.as_str().to_string()),
    ];

    counter!("cache_lookups_total", &labels).increment(count);
}

/// Record a backing store call made on the caller's path
pub fn record_backing_store_call(cache: &str, operation: &str, success: bool, duration: Duration) {
    let labels = [
        ("cache", cache.to_string()),
        ("operation", operation.to_string()),
        ("status", if success { "success" } else { "error" }.to_string()),
    ];

    counter!("cache_backing_store_calls_total", &labels).increment(1);
    histogram!("cache_backing_store_call_duration_seconds", &labels)
        .record(duration.as_secs_f64());
}

/// Record one write-behind `upsert_batch` attempt
pub fn record_write_behind_flush(cache: &str, entries: usize, success: bool, duration: Duration) {
    let labels = [
        ("cache", cache.to_string()),
        ("status", if success { "success" } else { "error" }.to_string()),
    ];

    counter!("cache_write_behind_flushes_total", &labels).increment(1);
    histogram!("cache_write_behind_flush_duration_seconds", &labels)
        .record(duration.as_secs_f64());

    if success {
        counter!("cache_write_behind_flushed_entries_total", "cache" => cache.to_string())
            .increment(entries as u64);
    }
}

pub fn record_write_behind_pending(cache: &str, pending: usize) {
    gauge!("cache_write_behind_pending", "cache" => cache.to_string()).set(pending as f64);
}

pub fn record_dropped_writes(cache: &str, count: usize) {
    counter!("cache_write_behind_dropped_total", "cache" => cache.to_string())
        .increment(count as u64);
}

/// Record removed cache keys, `kind` is one of `ids`, `all` or `pattern`
pub fn record_invalidation(cache: &str, kind: &str, removed: usize) {
    let labels = [("cache", cache.to_string()), ("kind", kind.to_string())];

    counter!("cache_invalidations_total", &labels).increment(1);
    counter!("cache_invalidated_keys_total", &labels).increment(removed as u64);
}
