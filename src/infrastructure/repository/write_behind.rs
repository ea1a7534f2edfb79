//! Write-behind buffer and its flusher task
//!
//! Callers append to a shared buffer and return immediately. A single
//! flusher task per repository drains the buffer into the backing store
//! when it reaches `batch_size`, or when the oldest pending entry is
//! `flush_interval` old, whichever comes first.
//!
//! A flush takes a snapshot of the whole buffer, so writes arriving during
//! a flush land in the next one. Failed entries are put back at the head
//! of the buffer and retried after one `flush_interval`; once an entry has
//! failed `max_retries + 1` times it is reported to the error sink and
//! dropped.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::domain::cache::{CacheEntity, WriteBehindSettings};
use crate::domain::storage::BackingStore;
use crate::domain::DomainError;
use crate::infrastructure::observability::{record_write_behind_flush, record_write_behind_pending};

use super::error_sink::{DroppedWrites, WriteBehindErrorSink};

#[derive(Debug, Clone)]
struct PendingWrite<E> {
    key: String,
    entity: E,
    enqueued_at: Instant,
    /// Failed upsert attempts so far
    attempt: u32,
}

/// Buffered, batched persistence for one repository
pub struct WriteBehindQueue<E>
where
    E: CacheEntity,
{
    cache_name: String,
    settings: WriteBehindSettings,
    operation_timeout: Duration,
    store: Arc<dyn BackingStore<E>>,
    sink: Arc<dyn WriteBehindErrorSink>,
    buffer: Mutex<VecDeque<PendingWrite<E>>>,
    notify: Notify,
    closed: AtomicBool,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl<E> fmt::Debug for WriteBehindQueue<E>
where
    E: CacheEntity,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBehindQueue")
            .field("cache_name", &self.cache_name)
            .field("settings", &self.settings)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<E> WriteBehindQueue<E>
where
    E: CacheEntity,
{
    /// Creates the queue and spawns its flusher on the current runtime
    pub fn start(
        cache_name: impl Into<String>,
        settings: WriteBehindSettings,
        operation_timeout: Duration,
        store: Arc<dyn BackingStore<E>>,
        sink: Arc<dyn WriteBehindErrorSink>,
    ) -> Result<Arc<Self>, DomainError> {
        let runtime = Handle::try_current().map_err(|_| {
            DomainError::configuration("Write-behind requires a running tokio runtime")
        })?;

        let queue = Arc::new(Self {
            cache_name: cache_name.into(),
            settings,
            operation_timeout,
            store,
            sink,
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            worker: StdMutex::new(None),
        });

        let handle = runtime.spawn(Arc::clone(&queue).run());

        if let Ok(mut worker) = queue.worker.lock() {
            *worker = Some(handle);
        }

        Ok(queue)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Appends writes in order; fails once the queue is closed
    pub async fn enqueue(&self, writes: Vec<(String, E)>) -> Result<(), DomainError> {
        if writes.is_empty() {
            return Ok(());
        }

        let pending = {
            let mut buffer = self.buffer.lock().await;

            // Checked under the lock so nothing slips in behind the final drain
            if self.is_closed() {
                return Err(DomainError::write_behind_closed(format!(
                    "Write-behind queue for '{}' is closed",
                    self.cache_name
                )));
            }

            let now = Instant::now();
            buffer.extend(writes.into_iter().map(|(key, entity)| PendingWrite {
                key,
                entity,
                enqueued_at: now,
                attempt: 0,
            }));
            buffer.len()
        };

        record_write_behind_pending(&self.cache_name, pending);
        self.notify.notify_one();

        Ok(())
    }

    /// Removes pending entries for the given keys, returns how many were removed
    pub async fn discard(&self, keys: &[String]) -> usize {
        if keys.is_empty() {
            return 0;
        }

        let mut buffer = self.buffer.lock().await;
        let before = buffer.len();
        buffer.retain(|write| !keys.contains(&write.key));
        let removed = before - buffer.len();

        if removed > 0 {
            tracing::debug!(cache = %self.cache_name, removed, "Discarded pending writes");
        }

        removed
    }

    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Signals the flusher to drain and exit without waiting for it
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    /// Closes the queue and waits up to `shutdown_timeout` for the drain
    pub async fn shutdown(&self) -> Result<(), DomainError> {
        self.close();

        let handle = self.worker.lock().ok().and_then(|mut worker| worker.take());
        let Some(handle) = handle else {
            return Ok(());
        };

        match timeout(self.settings.shutdown_timeout, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DomainError::internal(format!(
                "Write-behind flusher for '{}' panicked: {}",
                self.cache_name, e
            ))),
            Err(_) => {
                let pending = self.pending().await;
                tracing::warn!(
                    cache = %self.cache_name,
                    pending,
                    timeout = ?self.settings.shutdown_timeout,
                    "Write-behind drain did not finish before shutdown timeout"
                );
                Err(DomainError::flush_failed(format!(
                    "Shutdown timed out with {} pending writes",
                    pending
                )))
            }
        }
    }

    async fn run(self: Arc<Self>) {
        let interval = self.settings.flush_interval;
        let mut backoff_until: Option<Instant> = None;

        tracing::debug!(cache = %self.cache_name, "Write-behind flusher started");

        while !self.is_closed() {
            let (pending, oldest) = {
                let buffer = self.buffer.lock().await;
                (buffer.len(), buffer.front().map(|write| write.enqueued_at))
            };

            let now = Instant::now();
            let backing_off = backoff_until.filter(|until| now < *until);
            let size_due = pending >= self.settings.batch_size;
            let age_due = oldest.is_some_and(|at| now.duration_since(at) >= interval);

            if backing_off.is_none() && (size_due || age_due) {
                let succeeded = self.flush(false).await;
                backoff_until = (!succeeded).then(|| Instant::now() + interval);
                continue;
            }

            let wake_at = backing_off.or_else(|| oldest.map(|at| at + interval));

            match wake_at {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }

        self.flush(true).await;
        tracing::debug!(cache = %self.cache_name, "Write-behind flusher stopped");
    }

    /// Flushes a snapshot of the buffer, returns false if any chunk failed
    ///
    /// On the final pass failed entries are dropped instead of re-queued.
    async fn flush(&self, final_pass: bool) -> bool {
        let snapshot: Vec<PendingWrite<E>> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };

        if snapshot.is_empty() {
            return true;
        }

        let mut remaining = coalesce(snapshot);
        let mut failed = Vec::new();
        let mut last_error = None;

        while !remaining.is_empty() {
            let split_at = self.settings.batch_size.min(remaining.len());
            let rest = remaining.split_off(split_at);
            let chunk = std::mem::replace(&mut remaining, rest);

            let entities: Vec<E> = chunk.iter().map(|write| write.entity.clone()).collect();
            let started = std::time::Instant::now();

            let result = match timeout(self.operation_timeout, self.store.upsert_batch(entities)).await {
                Ok(result) => result,
                Err(_) => Err(DomainError::backing_store(format!(
                    "upsert_batch timed out after {:?}",
                    self.operation_timeout
                ))),
            };

            record_write_behind_flush(&self.cache_name, chunk.len(), result.is_ok(), started.elapsed());

            match result {
                Ok(()) => {
                    tracing::debug!(
                        cache = %self.cache_name,
                        count = chunk.len(),
                        "Flushed write-behind batch"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        cache = %self.cache_name,
                        count = chunk.len(),
                        error = %e,
                        "Write-behind flush failed"
                    );
                    failed.extend(chunk);
                    last_error = Some(e);
                }
            }
        }

        let succeeded = failed.is_empty();

        if let Some(error) = last_error {
            self.requeue_or_drop(failed, &error, final_pass).await;
        }

        let pending = self.buffer.lock().await.len();
        record_write_behind_pending(&self.cache_name, pending);

        succeeded
    }

    async fn requeue_or_drop(&self, failed: Vec<PendingWrite<E>>, error: &DomainError, final_pass: bool) {
        let max_retries = self.settings.max_retries;

        let (retry, dropped): (Vec<_>, Vec<_>) = failed
            .into_iter()
            .map(|mut write| {
                write.attempt += 1;
                write
            })
            .partition(|write| !final_pass && write.attempt <= max_retries);

        if !dropped.is_empty() {
            let attempts = dropped.iter().map(|write| write.attempt).max().unwrap_or(0);

            self.sink.on_dropped(&DroppedWrites {
                cache_name: self.cache_name.clone(),
                keys: dropped.into_iter().map(|write| write.key).collect(),
                attempts,
                error: DomainError::flush_failed(error.to_string()),
            });
        }

        if !retry.is_empty() {
            let mut buffer = self.buffer.lock().await;
            for write in retry.into_iter().rev() {
                buffer.push_front(write);
            }
        }
    }
}

/// Collapses writes to the same key, keeping the first position and the
/// latest value; the age of the oldest write is preserved
fn coalesce<E>(snapshot: Vec<PendingWrite<E>>) -> Vec<PendingWrite<E>> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(snapshot.len());
    let mut merged: Vec<PendingWrite<E>> = Vec::with_capacity(snapshot.len());

    for write in snapshot {
        match positions.get(&write.key) {
            Some(&index) => {
                let slot = &mut merged[index];
                let enqueued_at = slot.enqueued_at.min(write.enqueued_at);
                *slot = PendingWrite {
                    enqueued_at,
                    ..write
                };
            }
            None => {
                positions.insert(write.key.clone(), merged.len());
                merged.push(write);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::storage::mock::MockBackingStore;
    use crate::domain::{Record, RecordId};
    use crate::infrastructure::repository::error_sink::MockWriteBehindErrorSink;
    use crate::infrastructure::repository::TracingErrorSink;

    fn record(id: &str, version: i64) -> Record {
        Record::new(RecordId::new(id).unwrap(), serde_json::json!({ "v": version }))
    }

    fn write(id: &str, version: i64) -> (String, Record) {
        (format!("users:{}", id), record(id, version))
    }

    fn start(
        store: &Arc<MockBackingStore<Record>>,
        settings: WriteBehindSettings,
        sink: Arc<dyn WriteBehindErrorSink>,
    ) -> Arc<WriteBehindQueue<Record>> {
        WriteBehindQueue::start("users", settings, Duration::from_secs(1), store.clone(), sink)
            .unwrap()
    }

    async fn eventually(check: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while !check() {
            assert!(std::time::Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_flushes_when_batch_size_reached() {
        let store = Arc::new(MockBackingStore::new());
        let settings = WriteBehindSettings::default()
            .with_batch_size(3)
            .with_flush_interval(Duration::from_secs(60));
        let queue = start(&store, settings, Arc::new(TracingErrorSink));

        queue
            .enqueue(vec![write("a", 1), write("b", 1), write("c", 1)])
            .await
            .unwrap();

        eventually(|| store.row_count() == 3).await;
        assert_eq!(store.upsert_calls().len(), 1);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flushes_when_interval_elapses() {
        let store = Arc::new(MockBackingStore::new());
        let settings = WriteBehindSettings::default()
            .with_batch_size(100)
            .with_flush_interval(Duration::from_millis(50));
        let queue = start(&store, settings, Arc::new(TracingErrorSink));

        queue.enqueue(vec![write("a", 1)]).await.unwrap();
        assert_eq!(store.row_count(), 0);

        eventually(|| store.row_count() == 1).await;
        assert_eq!(queue.pending().await, 0);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_coalesces_same_key_to_latest_value() {
        let store = Arc::new(MockBackingStore::new());
        let settings = WriteBehindSettings::default()
            .with_batch_size(3)
            .with_flush_interval(Duration::from_secs(60));
        let queue = start(&store, settings, Arc::new(TracingErrorSink));

        queue
            .enqueue(vec![write("a", 1), write("b", 1), write("a", 2)])
            .await
            .unwrap();

        eventually(|| store.row_count() == 2).await;

        let calls = store.upsert_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][0].id.as_str(), "a");
        assert_eq!(calls[0][0].data["v"], 2);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_snapshot_is_chunked() {
        let store = Arc::new(MockBackingStore::new());
        let settings = WriteBehindSettings::default()
            .with_batch_size(2)
            .with_flush_interval(Duration::from_secs(60));
        let queue = start(&store, settings, Arc::new(TracingErrorSink));

        let writes = (0..5).map(|i| write(&i.to_string(), 1)).collect();
        queue.enqueue(writes).await.unwrap();

        eventually(|| store.row_count() == 5).await;

        let sizes: Vec<usize> = store.upsert_calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_then_reports_dropped_entries() {
        let store = Arc::new(MockBackingStore::new());
        store.set_failing(true);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = MockWriteBehindErrorSink::new();
        sink.expect_on_dropped().times(1).returning(move |dropped| {
            let _ = tx.send(dropped.clone());
        });

        let settings = WriteBehindSettings::default()
            .with_batch_size(1)
            .with_flush_interval(Duration::from_millis(20))
            .with_max_retries(2);
        let queue = start(&store, settings, Arc::new(sink));

        queue.enqueue(vec![write("a", 1)]).await.unwrap();

        let dropped = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(dropped.keys, vec!["users:a".to_string()]);
        assert_eq!(dropped.attempts, 3);
        assert!(matches!(dropped.error, DomainError::WriteBehindFlushFailed { .. }));
        assert_eq!(store.upsert_calls().len(), 3);
        assert_eq!(queue.pending().await, 0);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let store = Arc::new(MockBackingStore::new());
        store.fail_next(1);

        let mut sink = MockWriteBehindErrorSink::new();
        sink.expect_on_dropped().times(0);

        let settings = WriteBehindSettings::default()
            .with_batch_size(1)
            .with_flush_interval(Duration::from_millis(20));
        let queue = start(&store, settings, Arc::new(sink));

        queue.enqueue(vec![write("a", 1)]).await.unwrap();

        eventually(|| store.row_count() == 1).await;
        assert_eq!(store.upsert_calls().len(), 2);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_requeued_write_never_overtakes_newer_value() {
        let store = Arc::new(MockBackingStore::new());
        store.fail_next(1);
        store.set_latency(Some(Duration::from_millis(100)));

        let settings = WriteBehindSettings::default()
            .with_batch_size(1)
            .with_flush_interval(Duration::from_millis(20));
        let queue = start(&store, settings, Arc::new(TracingErrorSink));

        queue.enqueue(vec![write("a", 1)]).await.unwrap();
        eventually(|| store.upsert_calls().len() == 1).await;

        // v1 is still in flight and about to fail
        queue.enqueue(vec![write("a", 2)]).await.unwrap();

        eventually(|| store.row(&RecordId::new("a").unwrap()).is_some()).await;
        queue.shutdown().await.unwrap();

        let versions: Vec<i64> = store
            .upsert_calls()
            .into_iter()
            .flatten()
            .filter_map(|record| record.data["v"].as_i64())
            .collect();
        let first_v2 = versions.iter().position(|v| *v == 2).unwrap();

        assert!(versions[first_v2..].iter().all(|v| *v == 2));
        assert_eq!(
            store.row(&RecordId::new("a").unwrap()).unwrap().data["v"],
            2
        );
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects_new_writes() {
        let store = Arc::new(MockBackingStore::new());
        let settings = WriteBehindSettings::default()
            .with_batch_size(100)
            .with_flush_interval(Duration::from_secs(60));
        let queue = start(&store, settings, Arc::new(TracingErrorSink));

        queue
            .enqueue(vec![write("a", 1), write("b", 1)])
            .await
            .unwrap();

        queue.shutdown().await.unwrap();

        assert_eq!(store.row_count(), 2);
        let err = queue.enqueue(vec![write("c", 1)]).await.unwrap_err();
        assert!(matches!(err, DomainError::WriteBehindClosed { .. }));

        // second shutdown is a no-op
        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_final_drain_failure_is_reported() {
        let store = Arc::new(MockBackingStore::new());
        store.set_failing(true);

        let mut sink = MockWriteBehindErrorSink::new();
        sink.expect_on_dropped()
            .withf(|dropped| dropped.keys.len() == 2 && dropped.attempts == 1)
            .times(1)
            .return_const(());

        let settings = WriteBehindSettings::default()
            .with_batch_size(100)
            .with_flush_interval(Duration::from_secs(60));
        let queue = start(&store, settings, Arc::new(sink));

        queue
            .enqueue(vec![write("a", 1), write("b", 1)])
            .await
            .unwrap();

        queue.shutdown().await.unwrap();
        assert_eq!(store.upsert_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_discard_removes_pending_entries() {
        let store = Arc::new(MockBackingStore::new());
        let settings = WriteBehindSettings::default()
            .with_batch_size(100)
            .with_flush_interval(Duration::from_secs(60));
        let queue = start(&store, settings, Arc::new(TracingErrorSink));

        queue
            .enqueue(vec![write("a", 1), write("b", 1)])
            .await
            .unwrap();

        let removed = queue.discard(&["users:a".to_string()]).await;
        assert_eq!(removed, 1);
        assert_eq!(queue.pending().await, 1);

        queue.shutdown().await.unwrap();
        assert!(store.row(&RecordId::new("a").unwrap()).is_none());
        assert!(store.row(&RecordId::new("b").unwrap()).is_some());
    }

    #[test]
    fn test_coalesce_keeps_first_position_and_oldest_age() {
        let early = Instant::now();
        let late = early + Duration::from_millis(10);

        let merged = coalesce(vec![
            PendingWrite { key: "k1".to_string(), entity: 1, enqueued_at: early, attempt: 2 },
            PendingWrite { key: "k2".to_string(), entity: 2, enqueued_at: late, attempt: 0 },
            PendingWrite { key: "k1".to_string(), entity: 3, enqueued_at: late, attempt: 0 },
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].key, "k1");
        assert_eq!(merged[0].entity, 3);
        assert_eq!(merged[0].enqueued_at, early);
        assert_eq!(merged[0].attempt, 0);
        assert_eq!(merged[1].key, "k2");
    }
}
