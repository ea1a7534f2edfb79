//! Reporting of write-behind entries that never reached the backing store

use crate::domain::DomainError;
use crate::infrastructure::observability::record_dropped_writes;

#[cfg(test)]
use mockall::automock;

/// Entries discarded after exhausting their flush attempts
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedWrites {
    pub cache_name: String,
    pub keys: Vec<String>,
    /// Upsert attempts made for these entries
    pub attempts: u32,
    /// Last failure, as `DomainError::WriteBehindFlushFailed`
    pub error: DomainError,
}

/// Receives write-behind data loss notifications
///
/// Called from the flusher task; implementations must not block.
#[cfg_attr(test, automock)]
pub trait WriteBehindErrorSink: Send + Sync {
    fn on_dropped(&self, dropped: &DroppedWrites);
}

/// Default sink: an `error` log line plus a metrics counter
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl WriteBehindErrorSink for TracingErrorSink {
    fn on_dropped(&self, dropped: &DroppedWrites) {
        tracing::error!(
            cache = %dropped.cache_name,
            count = dropped.keys.len(),
            attempts = dropped.attempts,
            keys = ?dropped.keys,
            error = %dropped.error,
            "Dropping write-behind entries"
        );

        record_dropped_writes(&dropped.cache_name, dropped.keys.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_sink_accepts_report() {
        let sink = TracingErrorSink;
        sink.on_dropped(&DroppedWrites {
            cache_name: "users".to_string(),
            keys: vec!["users:1".to_string()],
            attempts: 4,
            error: DomainError::flush_failed("store down"),
        });
    }

    #[test]
    fn test_mock_sink_receives_keys() {
        let mut sink = MockWriteBehindErrorSink::new();
        sink.expect_on_dropped()
            .withf(|dropped| dropped.keys == vec!["users:1".to_string()])
            .times(1)
            .return_const(());

        sink.on_dropped(&DroppedWrites {
            cache_name: "users".to_string(),
            keys: vec!["users:1".to_string()],
            attempts: 1,
            error: DomainError::flush_failed("store down"),
        });
    }
}
