//! Tiered cache repository
//!
//! Reads go near cache → distributed cache → backing store (when
//! read-through is on), backfilling every faster tier on the way out.
//! Writes always land in the cache tiers first; the write mode then
//! decides whether the backing store is updated synchronously, by the
//! write-behind flusher, or not at all.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::domain::cache::{
    CacheEntity, CacheStrategyConfig, DistributedCache, GlobPattern, KeyCodec, WriteMode,
};
use crate::domain::storage::BackingStore;
use crate::domain::traits::EntityRepository;
use crate::domain::DomainError;
use crate::infrastructure::cache::NearCache;
use crate::infrastructure::observability::{
    record_backing_store_call, record_invalidation, record_tier_lookup, CacheTier, LookupOutcome,
};

use super::error_sink::{TracingErrorSink, WriteBehindErrorSink};
use super::write_behind::WriteBehindQueue;

/// Distributed-tier marker for "known absent" (negative caching)
///
/// JSON never starts with a NUL byte, so it cannot collide with a payload.
const TOMBSTONE: &str = "\u{0}absent";

enum Cached<E> {
    Hit(E),
    Absent,
    Miss,
}

/// Builder for [`CacheRepository`]
pub struct CacheRepositoryBuilder<E>
where
    E: CacheEntity,
{
    cache_name: String,
    config: CacheStrategyConfig,
    distributed: Option<Arc<dyn DistributedCache>>,
    store: Option<Arc<dyn BackingStore<E>>>,
    sink: Arc<dyn WriteBehindErrorSink>,
}

impl<E> CacheRepositoryBuilder<E>
where
    E: CacheEntity,
{
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            config: CacheStrategyConfig::default(),
            distributed: None,
            store: None,
            sink: Arc::new(TracingErrorSink),
        }
    }

    pub fn strategy(mut self, config: CacheStrategyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn distributed_cache(mut self, cache: Arc<dyn DistributedCache>) -> Self {
        self.distributed = Some(cache);
        self
    }

    pub fn backing_store(mut self, store: Arc<dyn BackingStore<E>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the default tracing sink for dropped write-behind entries
    pub fn error_sink(mut self, sink: Arc<dyn WriteBehindErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validates the configuration and starts the write-behind flusher if needed
    ///
    /// Must be called inside a tokio runtime when write-behind is enabled.
    pub fn build(self) -> Result<CacheRepository<E>, DomainError> {
        let codec = KeyCodec::new(self.cache_name)?;
        self.config.validate()?;

        let distributed = self.distributed.ok_or_else(|| {
            DomainError::configuration(format!(
                "Cache repository '{}' requires a distributed cache",
                codec.cache_name()
            ))
        })?;

        let store = self.store.ok_or_else(|| {
            DomainError::configuration(format!(
                "Cache repository '{}' requires a backing store",
                codec.cache_name()
            ))
        })?;

        let near = self.config.near_cache.as_ref().map(NearCache::<E>::new);

        let write_behind = match self.config.write_behind_settings() {
            Some(settings) => Some(WriteBehindQueue::start(
                codec.cache_name(),
                settings.clone(),
                self.config.operation_timeout,
                Arc::clone(&store),
                self.sink,
            )?),
            None => None,
        };

        tracing::info!(
            cache = %codec.cache_name(),
            strategy = self.config.label(),
            near_cache = near.is_some(),
            ttl = ?self.config.ttl,
            "Cache repository ready"
        );

        Ok(CacheRepository {
            codec,
            config: self.config,
            distributed,
            store,
            near,
            write_behind,
        })
    }
}

/// Repository applying one [`CacheStrategyConfig`] over a distributed cache
/// and a backing store
#[derive(Debug)]
pub struct CacheRepository<E>
where
    E: CacheEntity,
{
    codec: KeyCodec,
    config: CacheStrategyConfig,
    distributed: Arc<dyn DistributedCache>,
    store: Arc<dyn BackingStore<E>>,
    near: Option<NearCache<E>>,
    write_behind: Option<Arc<WriteBehindQueue<E>>>,
}

impl<E> CacheRepository<E>
where
    E: CacheEntity,
{
    pub fn builder(cache_name: impl Into<String>) -> CacheRepositoryBuilder<E> {
        CacheRepositoryBuilder::new(cache_name)
    }

    pub fn cache_name(&self) -> &str {
        self.codec.cache_name()
    }

    pub fn strategy(&self) -> &CacheStrategyConfig {
        &self.config
    }

    /// Number of buffered write-behind entries not yet persisted
    pub async fn pending_writes(&self) -> usize {
        match &self.write_behind {
            Some(queue) => queue.pending().await,
            None => 0,
        }
    }

    /// Stops the write-behind flusher after draining, bounded by `shutdown_timeout`
    ///
    /// Later writes fail with `WriteBehindClosed`.
    pub async fn shutdown(&self) -> Result<(), DomainError> {
        match &self.write_behind {
            Some(queue) => queue.shutdown().await,
            None => Ok(()),
        }
    }

    async fn cache_call<T, F>(&self, operation: &str, call: F) -> Result<T, DomainError>
    where
        F: Future<Output = Result<T, DomainError>>,
    {
        match timeout(self.config.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::distributed_cache(format!(
                "{} timed out after {:?}",
                operation, self.config.operation_timeout
            ))),
        }
    }

    async fn store_call<T, F>(&self, operation: &str, call: F) -> Result<T, DomainError>
    where
        F: Future<Output = Result<T, DomainError>>,
    {
        let started = std::time::Instant::now();

        let result = match timeout(self.config.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::backing_store(format!(
                "{} timed out after {:?}",
                operation, self.config.operation_timeout
            ))),
        };

        record_backing_store_call(
            self.cache_name(),
            operation,
            result.is_ok(),
            started.elapsed(),
        );

        result
    }

    fn lookup(&self, tier: CacheTier, outcome: LookupOutcome, count: usize) {
        record_tier_lookup(self.cache_name(), tier, outcome, count as u64);
    }

    fn serialize(entity: &E) -> Result<String, DomainError> {
        serde_json::to_string(entity).map_err(|e| {
            DomainError::serialization(format!("Failed to serialize {:?}: {}", entity.id(), e))
        })
    }

    fn decode(&self, key: &str, raw: Option<String>) -> Cached<E> {
        match raw {
            None => Cached::Miss,
            Some(raw) if raw == TOMBSTONE => Cached::Absent,
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(entity) => Cached::Hit(entity),
                Err(e) => {
                    tracing::warn!(
                        cache = %self.cache_name(),
                        key = %key,
                        error = %e,
                        "Undecodable cache entry, treating as a miss"
                    );
                    Cached::Miss
                }
            },
        }
    }

    /// Writes store-sourced entities to the distributed tier; failures are logged only
    async fn backfill_distributed(&self, entries: &[(String, E)]) {
        if entries.is_empty() {
            return;
        }

        let payloads: Vec<(String, String)> = entries
            .iter()
            .filter_map(|(key, entity)| match Self::serialize(entity) {
                Ok(payload) => Some((key.clone(), payload)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping backfill");
                    None
                }
            })
            .collect();

        let result = self
            .cache_call(
                "set_many_raw",
                self.distributed.set_many_raw(&payloads, self.config.ttl),
            )
            .await;

        if let Err(e) = result {
            tracing::warn!(
                cache = %self.cache_name(),
                count = payloads.len(),
                error = %e,
                "Distributed cache backfill failed"
            );
        }
    }

    async fn backfill_near(&self, entries: impl IntoIterator<Item = (String, E)>) {
        if let Some(near) = &self.near {
            for (key, entity) in entries {
                near.put_default(&key, entity).await;
            }
        }
    }

    async fn write_tombstones(&self, keys: &[String]) {
        let Some(ttl) = self.config.negative_ttl else {
            return;
        };

        if keys.is_empty() {
            return;
        }

        let entries: Vec<(String, String)> = keys
            .iter()
            .map(|key| (key.clone(), TOMBSTONE.to_string()))
            .collect();

        if let Err(e) = self
            .cache_call("set_many_raw", self.distributed.set_many_raw(&entries, ttl))
            .await
        {
            tracing::warn!(cache = %self.cache_name(), error = %e, "Failed to write tombstones");
        }
    }

    fn ensure_writable(&self) -> Result<(), DomainError> {
        match &self.write_behind {
            Some(queue) if queue.is_closed() => Err(DomainError::write_behind_closed(format!(
                "Cache repository '{}' has been shut down",
                self.cache_name()
            ))),
            _ => Ok(()),
        }
    }

    /// Writes the cache tiers, then hands the entities to the write mode
    async fn write(&self, entities: Vec<E>) -> Result<(), DomainError> {
        self.ensure_writable()?;

        let payloads = entities
            .iter()
            .map(|entity| Ok((self.codec.encode(entity.id()), Self::serialize(entity)?)))
            .collect::<Result<Vec<(String, String)>, DomainError>>()?;

        match payloads.as_slice() {
            [(key, payload)] => {
                self.cache_call("set_raw", self.distributed.set_raw(key, payload, self.config.ttl))
                    .await?
            }
            _ => {
                self.cache_call(
                    "set_many_raw",
                    self.distributed.set_many_raw(&payloads, self.config.ttl),
                )
                .await?
            }
        }

        let writes: Vec<(String, E)> = payloads
            .into_iter()
            .map(|(key, _)| key)
            .zip(entities)
            .collect();

        if let Some(near) = &self.near {
            for (key, entity) in &writes {
                near.put_default(key, entity.clone()).await;
            }
        }

        match (&self.config.write_mode, &self.write_behind) {
            (WriteMode::Through, _) => {
                let count = writes.len();
                let entities = writes.into_iter().map(|(_, entity)| entity).collect();

                self.store_call("upsert_batch", self.store.upsert_batch(entities))
                    .await
                    .inspect_err(|e| {
                        tracing::warn!(
                            cache = %self.cache_name(),
                            count,
                            error = %e,
                            "Write-through failed, cache is ahead of the backing store"
                        );
                    })
            }
            (WriteMode::Behind(_), Some(queue)) => queue.enqueue(writes).await,
            (WriteMode::Behind(_), None) => Err(DomainError::internal(
                "Write-behind mode without a running queue",
            )),
            (WriteMode::None, _) => Ok(()),
        }
    }

    async fn scan_keys(&self, pattern: &GlobPattern) -> Result<Vec<String>, DomainError> {
        let mut keys = BTreeSet::new();
        let mut cursor = 0;

        loop {
            let page = self
                .cache_call(
                    "scan",
                    self.distributed.scan(
                        pattern.as_str(),
                        cursor,
                        self.config.invalidation_batch_size,
                    ),
                )
                .await?;

            keys.extend(
                page.keys
                    .into_iter()
                    .filter(|key| self.codec.owns(key) && pattern.is_match(key)),
            );

            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }

        Ok(keys.into_iter().collect())
    }

    async fn delete_in_chunks(&self, keys: &[String]) -> Result<usize, DomainError> {
        let mut removed = 0;

        for chunk in keys.chunks(self.config.invalidation_batch_size) {
            removed += self
                .cache_call("delete_many", self.distributed.delete_many(chunk))
                .await?;
        }

        Ok(removed)
    }
}

impl<E> Drop for CacheRepository<E>
where
    E: CacheEntity,
{
    fn drop(&mut self) {
        if let Some(queue) = &self.write_behind {
            queue.close();
        }
    }
}

#[async_trait]
impl<E> EntityRepository<E> for CacheRepository<E>
where
    E: CacheEntity,
{
    async fn get(&self, id: &E::Id) -> Result<Option<E>, DomainError> {
        let key = self.codec.encode(id);

        if let Some(near) = &self.near {
            if let Some(entity) = near.get(&key).await {
                self.lookup(CacheTier::Near, LookupOutcome::Hit, 1);
                return Ok(Some(entity));
            }
            self.lookup(CacheTier::Near, LookupOutcome::Miss, 1);
        }

        let distributed_error = match self.cache_call("get", self.distributed.get_raw(&key)).await {
            Ok(raw) => match self.decode(&key, raw) {
                Cached::Hit(entity) => {
                    self.lookup(CacheTier::Distributed, LookupOutcome::Hit, 1);
                    self.backfill_near([(key.clone(), entity.clone())]).await;
                    return Ok(Some(entity));
                }
                Cached::Absent => {
                    self.lookup(CacheTier::Distributed, LookupOutcome::Hit, 1);
                    return Ok(None);
                }
                Cached::Miss => {
                    self.lookup(CacheTier::Distributed, LookupOutcome::Miss, 1);
                    None
                }
            },
            Err(e) => {
                self.lookup(CacheTier::Distributed, LookupOutcome::Error, 1);

                if !self.config.read_through {
                    return Err(e);
                }

                tracing::warn!(
                    cache = %self.cache_name(),
                    key = %key,
                    error = %e,
                    "Distributed cache unavailable, reading backing store"
                );
                Some(e)
            }
        };

        if !self.config.read_through {
            return Ok(None);
        }

        match self.store_call("load_one", self.store.load_one(id)).await {
            Ok(Some(entity)) => {
                self.lookup(CacheTier::BackingStore, LookupOutcome::Hit, 1);

                if distributed_error.is_none() {
                    self.backfill_distributed(&[(key.clone(), entity.clone())])
                        .await;
                }
                self.backfill_near([(key, entity.clone())]).await;

                Ok(Some(entity))
            }
            Ok(None) => {
                self.lookup(CacheTier::BackingStore, LookupOutcome::Miss, 1);

                if distributed_error.is_none() {
                    self.write_tombstones(&[key]).await;
                }

                Ok(None)
            }
            Err(e) => {
                self.lookup(CacheTier::BackingStore, LookupOutcome::Error, 1);

                if distributed_error.is_some() {
                    return Err(e);
                }

                tracing::warn!(
                    cache = %self.cache_name(),
                    key = %key,
                    error = %e,
                    "Backing store unavailable on read-through, treating as not found"
                );
                Ok(None)
            }
        }
    }

    async fn get_all(&self, ids: &[E::Id]) -> Result<Vec<E>, DomainError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<&E::Id> = ids.iter().filter(|id| seen.insert(*id)).collect();

        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = unique.iter().map(|id| self.codec.encode(*id)).collect();
        let mut found: HashMap<String, E> = HashMap::with_capacity(keys.len());
        let mut known_absent: HashSet<String> = HashSet::new();

        if let Some(near) = &self.near {
            for key in &keys {
                if let Some(entity) = near.get(key).await {
                    found.insert(key.clone(), entity);
                }
            }

            self.lookup(CacheTier::Near, LookupOutcome::Hit, found.len());
            self.lookup(CacheTier::Near, LookupOutcome::Miss, keys.len() - found.len());
        }

        let probe: Vec<String> = keys
            .iter()
            .filter(|key| !found.contains_key(*key))
            .cloned()
            .collect();

        let mut near_backfill: Vec<(String, E)> = Vec::new();
        let mut distributed_error = None;

        if !probe.is_empty() {
            match self
                .cache_call("get_many_raw", self.distributed.get_many_raw(&probe))
                .await
            {
                Ok(values) => {
                    let mut hits = 0;

                    for (key, raw) in probe.iter().zip(values) {
                        match self.decode(key, raw) {
                            Cached::Hit(entity) => {
                                hits += 1;
                                near_backfill.push((key.clone(), entity.clone()));
                                found.insert(key.clone(), entity);
                            }
                            Cached::Absent => {
                                hits += 1;
                                known_absent.insert(key.clone());
                            }
                            Cached::Miss => {}
                        }
                    }

                    self.lookup(CacheTier::Distributed, LookupOutcome::Hit, hits);
                    self.lookup(CacheTier::Distributed, LookupOutcome::Miss, probe.len() - hits);
                }
                Err(e) => {
                    self.lookup(CacheTier::Distributed, LookupOutcome::Error, probe.len());

                    if !self.config.read_through {
                        return Err(e);
                    }

                    tracing::warn!(
                        cache = %self.cache_name(),
                        count = probe.len(),
                        error = %e,
                        "Distributed cache unavailable, reading backing store"
                    );
                    distributed_error = Some(e);
                }
            }
        }

        let mut store_backfill: Vec<(String, E)> = Vec::new();

        if self.config.read_through {
            let missing: Vec<(&E::Id, &String)> = unique
                .iter()
                .copied()
                .zip(keys.iter())
                .filter(|(_, key)| !found.contains_key(*key) && !known_absent.contains(*key))
                .collect();

            if !missing.is_empty() {
                let missing_ids: Vec<E::Id> = missing.iter().map(|(id, _)| (*id).clone()).collect();

                match self.store_call("load_many", self.store.load_many(&missing_ids)).await {
                    Ok(entities) => {
                        let wanted: HashSet<&str> =
                            missing.iter().map(|(_, key)| key.as_str()).collect();

                        for entity in entities {
                            let key = self.codec.encode(entity.id());

                            // unrequested or duplicate rows are ignored
                            if wanted.contains(key.as_str()) && !found.contains_key(&key) {
                                store_backfill.push((key.clone(), entity.clone()));
                                found.insert(key, entity);
                            }
                        }

                        self.lookup(CacheTier::BackingStore, LookupOutcome::Hit, store_backfill.len());
                        self.lookup(
                            CacheTier::BackingStore,
                            LookupOutcome::Miss,
                            missing.len() - store_backfill.len(),
                        );

                        if distributed_error.is_none() {
                            let absent: Vec<String> = missing
                                .iter()
                                .map(|(_, key)| (*key).clone())
                                .filter(|key| !found.contains_key(key))
                                .collect();
                            self.write_tombstones(&absent).await;
                        }
                    }
                    Err(e) => {
                        self.lookup(CacheTier::BackingStore, LookupOutcome::Error, missing.len());

                        if distributed_error.is_some() {
                            return Err(e);
                        }

                        tracing::warn!(
                            cache = %self.cache_name(),
                            count = missing.len(),
                            error = %e,
                            "Backing store unavailable on read-through, omitting misses"
                        );
                    }
                }
            }
        }

        if distributed_error.is_none() {
            self.backfill_distributed(&store_backfill).await;
        }
        self.backfill_near(near_backfill.into_iter().chain(store_backfill))
            .await;

        Ok(keys.iter().filter_map(|key| found.remove(key)).collect())
    }

    async fn put(&self, entity: E) -> Result<(), DomainError> {
        self.write(vec![entity]).await
    }

    async fn put_all(&self, entities: Vec<E>) -> Result<(), DomainError> {
        if entities.is_empty() {
            return Ok(());
        }

        self.write(entities).await
    }

    async fn invalidate(&self, ids: &[E::Id]) -> Result<usize, DomainError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let keys = self.codec.encode_all(ids);

        if let Some(near) = &self.near {
            near.evict_many(&keys).await;
        }

        let removed = self
            .cache_call("delete_many", self.distributed.delete_many(&keys))
            .await?;

        if self.config.delete_from_backing_store_on_invalidate {
            if let Some(queue) = &self.write_behind {
                queue.discard(&keys).await;
            }

            let deleted = self
                .store_call("delete_many", self.store.delete_many(ids))
                .await?;

            tracing::debug!(
                cache = %self.cache_name(),
                deleted,
                "Deleted invalidated rows from backing store"
            );
        }

        record_invalidation(self.cache_name(), "ids", removed);
        Ok(removed)
    }

    async fn invalidate_all(&self) -> Result<usize, DomainError> {
        let pattern = GlobPattern::new(self.codec.namespace_glob())?;

        if let Some(near) = &self.near {
            near.clear();
        }

        let keys = self.scan_keys(&pattern).await?;
        let removed = self.delete_in_chunks(&keys).await?;

        tracing::info!(
            cache = %self.cache_name(),
            removed,
            "Cleared cache namespace"
        );
        record_invalidation(self.cache_name(), "all", removed);

        Ok(removed)
    }

    async fn invalidate_by_pattern(&self, glob: &str) -> Result<usize, DomainError> {
        let pattern = GlobPattern::new(glob)?;

        if let Some(near) = &self.near {
            near.evict_matching(&pattern).await;
        }

        let keys = self.scan_keys(&pattern).await?;
        let removed = self.delete_in_chunks(&keys).await?;

        tracing::debug!(
            cache = %self.cache_name(),
            pattern = %glob,
            removed,
            "Invalidated keys by pattern"
        );
        record_invalidation(self.cache_name(), "pattern", removed);

        Ok(removed)
    }
}
