//! Observability infrastructure - Metrics

mod config;
mod metrics;

pub use config::MetricsConfig;
pub use metrics::{
    init_metrics, record_backing_store_call, record_dropped_writes, record_invalidation,
    record_tier_lookup, record_write_behind_flush, record_write_behind_pending, CacheTier,
    LookupOutcome, PrometheusMetrics,
};
