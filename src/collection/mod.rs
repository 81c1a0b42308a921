mod compact;
mod index;
mod maintenance;
mod read;
mod vacuum;

pub use compact::CompactionReport;
pub use index::IndexEntry;
pub use read::RecordStream;
pub use vacuum::VacuumReport;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::config::CollectionOptions;
use crate::error::{Error, Result};
use crate::hooks::Hooks;
use crate::lock::LeaseLock;
use crate::record::{self, StoredRecord};
use crate::store::{list_all, BlobStore};
use crate::util::bloom::BloomFilter;
use crate::util::clock::{monotonic_timestamp, now_ms};
use crate::util::retry::with_retry;

/// Blob keys derived once from the collection name. The suffixes are
/// reserved by the name validation, so collections can never collide.
pub(crate) struct CollectionKeys {
    pub snapshot: String,
    pub mutation_prefix: String,
    pub lock: String,
    pub index: String,
    pub bloom: String,
    pub tmp: String,
}

impl CollectionKeys {
    fn new(name: &str) -> Self {
        Self {
            snapshot: format!("{name}.jsonl"),
            mutation_prefix: format!("{name}.mutation."),
            lock: format!("{name}.lock"),
            index: format!("{name}.idx"),
            bloom: format!("{name}.bloom"),
            tmp: format!("{name}.jsonl.tmp"),
        }
    }
}

#[derive(Default)]
pub(crate) struct Caches {
    pub index: Option<HashMap<String, IndexEntry>>,
    pub bloom: Option<BloomFilter>,
    pub snapshot_body: Option<Arc<Vec<u8>>>,
}

pub(crate) struct Inner {
    pub name: String,
    pub store: Arc<dyn BlobStore>,
    pub options: CollectionOptions,
    pub hooks: Hooks,
    pub keys: CollectionKeys,
    pub lock: LeaseLock,
    pub caches: Mutex<Caches>,
}

impl Inner {
    pub fn invalidate_caches(&self) {
        let mut caches = self.caches.lock();
        caches.index = None;
        caches.bloom = None;
        caches.snapshot_body = None;
    }
}

/// Equality filter over document fields, or an arbitrary predicate.
#[derive(Clone)]
pub enum Filter {
    /// Partial-object match: every given field must be present in the
    /// document and equal.
    Matches(serde_json::Map<String, Value>),
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Filter {
    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Matches(fields) => {
                let Some(obj) = data.as_object() else {
                    return false;
                };
                fields.iter().all(|(k, v)| obj.get(k) == Some(v))
            }
            Filter::Predicate(pred) => pred(data),
        }
    }
}

#[derive(Clone, Default)]
pub struct FindOptions {
    pub filter: Option<Filter>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Time-travel bound: ignore records written after this timestamp.
    pub at: Option<u64>,
}

/// A staged multi-record write. All records share one timestamp and
/// land as a single mutation blob, so the batch is atomic within its
/// collection.
pub struct Batch<'a> {
    collection: &'a Collection,
    items: Vec<(String, Value)>,
}

impl Batch<'_> {
    pub fn put(&mut self, data: Value) -> Result<&mut Self> {
        let id = record::validate_document(&data)?;
        self.items.push((id, data));
        Ok(self)
    }

    pub fn delete(&mut self, id: impl Into<String>) -> &mut Self {
        self.items.push((id.into(), Value::Null));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub async fn commit(self) -> Result<()> {
        if self.items.is_empty() {
            return Ok(());
        }
        self.collection.write_mutations(self.items).await
    }
}

/// A single log-structured collection. Cheap to clone; all state lives
/// in storage except the per-instance read caches, which are
/// invalidated on every local write and carry no cross-process
/// guarantees.
#[derive(Clone)]
pub struct Collection(pub(crate) Arc<Inner>);

impl Collection {
    pub(crate) fn open(
        store: Arc<dyn BlobStore>,
        name: &str,
        options: CollectionOptions,
        hooks: Hooks,
    ) -> Result<Self> {
        validate_name(name)?;
        let lock = LeaseLock::new(store.clone(), options.lock.clone());
        Ok(Self(Arc::new(Inner {
            name: name.to_string(),
            keys: CollectionKeys::new(name),
            store,
            options,
            hooks,
            lock,
            caches: Mutex::new(Caches::default()),
        })))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Insert or replace one document. `data` must be an object whose
    /// `"id"` field is a non-empty string. Two processes writing the
    /// same id within the same millisecond race to an undefined winner;
    /// callers needing determinism carry causality inside `data`.
    pub async fn put(&self, data: Value) -> Result<()> {
        let id = record::validate_document(&data)?;
        self.write_mutations(vec![(id, data)]).await
    }

    /// Write a tombstone for `id`. The id disappears from reads
    /// immediately and is physically dropped by a later vacuum.
    pub async fn delete(&self, id: impl Into<String>) -> Result<()> {
        self.write_mutations(vec![(id.into(), Value::Null)]).await
    }

    pub fn batch(&self) -> Batch<'_> {
        Batch {
            collection: self,
            items: Vec::new(),
        }
    }

    async fn write_mutations(&self, items: Vec<(String, Value)>) -> Result<()> {
        let inner = &self.0;
        let ts = monotonic_timestamp();
        let records: Vec<StoredRecord> = items
            .into_iter()
            .map(|(id, data)| StoredRecord { id, data, ts })
            .collect();

        let body = record::encode_batch(&records)?;
        if body.len() > inner.options.max_mutation_size {
            return Err(Error::SizeLimit {
                size: body.len(),
                limit: inner.options.max_mutation_size,
            });
        }

        let key = format!("{}{}-{}", inner.keys.mutation_prefix, ts, Uuid::new_v4());
        match &inner.options.retry {
            Some(retry) => {
                let store = inner.store.clone();
                with_retry(retry, "write mutation", || store.put(&key, &body)).await?
            }
            None => inner.store.put(&key, &body).await?,
        }

        inner.invalidate_caches();
        tracing::debug!(
            collection = %inner.name,
            records = records.len(),
            ts,
            "mutation written"
        );
        inner.hooks.write(&inner.name, records.len());
        maintenance::schedule_after_write(inner.clone());
        Ok(())
    }

    /// Stream every record visible to this collection: snapshot lines
    /// first, then pending mutations in listing order. The mutation key
    /// set is pinned before the snapshot is touched, so a concurrent
    /// compaction cannot hide records mid-iteration.
    pub async fn read(&self, at: Option<u64>) -> Result<RecordStream> {
        RecordStream::open(&self.0, at).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Value>> {
        self.get_at(id, None).await
    }

    pub async fn get_at(&self, id: &str, at: Option<u64>) -> Result<Option<Value>> {
        let inner = &self.0;
        if at.is_none() {
            if let Some(result) = self.try_fast_path(id).await? {
                return Ok(result);
            }
        }

        // Full scan, remembering the newest record for the id.
        let mut stream = self.read(at).await?;
        let mut best: Option<StoredRecord> = None;
        while let Some(rec) = stream.next().await? {
            if rec.id == id && best.as_ref().map_or(true, |b| rec.ts >= b.ts) {
                best = Some(rec);
            }
        }
        Ok(best
            .filter(|r| !r.is_tombstone())
            .filter(|r| !r.is_expired(inner.options.ttl_field.as_deref(), now_ms()))
            .map(|r| r.data))
    }

    /// Fast paths over the cached bloom filter / byte-offset index.
    /// Returns `Some(answer)` when they settle the lookup, `None` when
    /// the caller must fall through to a full scan.
    async fn try_fast_path(&self, id: &str) -> Result<Option<Option<Value>>> {
        let inner = &self.0;
        if !inner.options.use_index && !inner.options.use_bloom_filter {
            return Ok(None);
        }
        self.ensure_fast_caches().await?;

        let (bloom_miss, index_lookup, body) = {
            let caches = inner.caches.lock();
            let bloom_miss = caches
                .bloom
                .as_ref()
                .map(|b| !b.might_contain(id))
                .unwrap_or(false);
            let index_lookup = caches.index.as_ref().map(|idx| idx.get(id).copied());
            (bloom_miss, index_lookup, caches.snapshot_body.clone())
        };

        if bloom_miss {
            return Ok(Some(None));
        }
        match index_lookup {
            // Index loaded and the id is absent: it has no live record.
            Some(None) => Ok(Some(None)),
            Some(Some(entry)) => {
                let Some(body) = body else { return Ok(None) };
                let start = entry.offset as usize;
                let end = start + entry.length as usize;
                if end > body.len() {
                    tracing::warn!(collection = %inner.name, id, "index span out of bounds, falling back to scan");
                    return Ok(None);
                }
                match record::parse_record_line(&body[start..end]) {
                    Some(rec)
                        if !rec.is_tombstone()
                            && !rec.is_expired(inner.options.ttl_field.as_deref(), now_ms()) =>
                    {
                        Ok(Some(Some(rec.data)))
                    }
                    _ => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    /// Load index/bloom/snapshot-body caches if they are enabled and
    /// loadable. They only describe a snapshot state, so they are valid
    /// iff zero mutation blobs exist at the moment of load.
    async fn ensure_fast_caches(&self) -> Result<()> {
        let inner = &self.0;
        let need_index = inner.options.use_index;
        let need_bloom = inner.options.use_bloom_filter;
        {
            let caches = inner.caches.lock();
            let index_ready = !need_index || caches.index.is_some();
            let bloom_ready = !need_bloom || caches.bloom.is_some();
            if index_ready && bloom_ready {
                return Ok(());
            }
        }

        let pending = inner
            .store
            .list(&inner.keys.mutation_prefix, None)
            .await?;
        if !pending.keys.is_empty() {
            return Ok(());
        }

        let bloom = if need_bloom {
            match inner.store.get_bytes(&inner.keys.bloom).await? {
                Some((bytes, _)) => match index::parse_bloom(&bytes) {
                    Ok(filter) => Some(filter),
                    Err(err) => {
                        tracing::warn!(collection = %inner.name, error = %err, "ignoring unreadable bloom blob");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        let (index_map, snapshot_body) = if need_index {
            match inner.store.get_bytes(&inner.keys.index).await? {
                Some((bytes, _)) => match index::parse_index(&bytes) {
                    Ok(map) => {
                        let body = inner
                            .store
                            .get_bytes(&inner.keys.snapshot)
                            .await?
                            .map(|(bytes, _)| Arc::new(bytes))
                            .unwrap_or_default();
                        (Some(map), Some(body))
                    }
                    Err(err) => {
                        tracing::warn!(collection = %inner.name, error = %err, "ignoring unreadable index blob");
                        (None, None)
                    }
                },
                None => (None, None),
            }
        } else {
            (None, None)
        };

        let mut caches = inner.caches.lock();
        if bloom.is_some() {
            caches.bloom = bloom;
        }
        if let Some(map) = index_map {
            caches.index = Some(map);
            caches.snapshot_body = snapshot_body;
        }
        Ok(())
    }

    /// One `read` pass filtered against the id set; returns the latest
    /// live document per found id.
    pub async fn get_many<I, S>(&self, ids: I) -> Result<HashMap<String, Value>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let wanted: std::collections::HashSet<String> = ids.into_iter().map(Into::into).collect();
        if wanted.is_empty() {
            return Ok(HashMap::new());
        }
        let latest = self.latest_by_id(None).await?;
        let ttl = self.0.options.ttl_field.clone();
        let now = now_ms();
        Ok(latest
            .into_iter()
            .filter(|(id, _)| wanted.contains(id))
            .filter(|(_, r)| !r.is_tombstone() && !r.is_expired(ttl.as_deref(), now))
            .map(|(id, r)| (id, r.data))
            .collect())
    }

    /// Latest-per-id fold over `read(at)`, resolved by record `ts`
    /// (last write wins), never by stream order.
    pub(crate) async fn latest_by_id(&self, at: Option<u64>) -> Result<HashMap<String, StoredRecord>> {
        let mut stream = self.read(at).await?;
        let mut latest: HashMap<String, StoredRecord> = HashMap::new();
        while let Some(rec) = stream.next().await? {
            match latest.get(&rec.id) {
                Some(seen) if seen.ts > rec.ts => {}
                _ => {
                    latest.insert(rec.id.clone(), rec);
                }
            }
        }
        Ok(latest)
    }

    /// Predicate scan. Results are ordered by id so `offset`/`limit`
    /// paginate deterministically.
    pub async fn find(&self, options: FindOptions) -> Result<Vec<Value>> {
        let latest = self.latest_by_id(options.at).await?;
        let ttl = self.0.options.ttl_field.clone();
        let now = now_ms();

        let mut rows: Vec<(String, Value)> = latest
            .into_iter()
            .filter(|(_, r)| !r.is_tombstone() && !r.is_expired(ttl.as_deref(), now))
            .filter(|(_, r)| options.filter.as_ref().map_or(true, |f| f.matches(&r.data)))
            .map(|(id, r)| (id, r.data))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(options.offset)
            .take(limit)
            .map(|(_, data)| data)
            .collect())
    }

    pub async fn count(&self) -> Result<usize> {
        self.count_at(None).await
    }

    pub async fn count_at(&self, at: Option<u64>) -> Result<usize> {
        let latest = self.latest_by_id(at).await?;
        let ttl = self.0.options.ttl_field.clone();
        let now = now_ms();
        Ok(latest
            .values()
            .filter(|r| !r.is_tombstone() && !r.is_expired(ttl.as_deref(), now))
            .count())
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Write a tombstone for every currently expired record and return
    /// how many were tombstoned. Physical removal still needs a vacuum.
    pub async fn delete_expired(&self) -> Result<usize> {
        let Some(ttl) = self.0.options.ttl_field.clone() else {
            return Ok(0);
        };
        let latest = self.latest_by_id(None).await?;
        let now = now_ms();
        let expired: Vec<(String, Value)> = latest
            .into_iter()
            .filter(|(_, r)| !r.is_tombstone() && r.is_expired(Some(&ttl), now))
            .map(|(id, _)| (id, Value::Null))
            .collect();
        let count = expired.len();
        if count > 0 {
            self.write_mutations(expired).await?;
        }
        Ok(count)
    }

    /// Number of mutation blobs not yet folded into the snapshot.
    pub async fn pending_mutations(&self) -> Result<usize> {
        Ok(list_all(self.0.store.as_ref(), &self.0.keys.mutation_prefix)
            .await?
            .len())
    }

    /// Merge all pending mutation blobs into the snapshot and delete
    /// them, under the maintenance lease.
    pub async fn compact(&self) -> Result<CompactionReport> {
        compact::run(&self.0).await
    }

    /// Rewrite the snapshot keeping one record per live id (modulo the
    /// bounded-cache overflow), under the maintenance lease.
    pub async fn vacuum(&self) -> Result<VacuumReport> {
        vacuum::run(&self.0).await
    }
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    let valid_len = (1..=64).contains(&name.len());
    let valid_head = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    let valid_tail = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid_len && valid_head && valid_tail {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}
