use std::collections::VecDeque;
use std::sync::Arc;

use super::Inner;
use crate::error::Result;
use crate::record::{self, StoredRecord};
use crate::store::{list_all, BlobStore};
use crate::util::fanout::bounded_map;
use crate::util::ndjson::NdjsonReader;

/// Pull-based iterator over everything visible to a collection:
/// snapshot lines first, then pending mutations in listing order.
/// Finite and non-restartable; call `Collection::read` again to
/// re-scan. Consumers must dedupe by record `ts`, never by position.
pub struct RecordStream {
    store: Arc<dyn BlobStore>,
    collection: String,
    at: Option<u64>,
    snapshot: Option<NdjsonReader<crate::store::BodyReader>>,
    chunks: VecDeque<Vec<String>>,
    buffered: VecDeque<StoredRecord>,
    read_parallelism: usize,
}

impl RecordStream {
    pub(crate) async fn open(inner: &Arc<Inner>, at: Option<u64>) -> Result<Self> {
        // Pin the mutation set before touching the snapshot, so a
        // concurrent compaction (which appends to the snapshot and then
        // deletes mutations) cannot hide records from this pass.
        let mut keys = list_all(inner.store.as_ref(), &inner.keys.mutation_prefix).await?;
        if let Some(bound) = at {
            keys.retain(|key| {
                match mutation_key_ts(&inner.keys.mutation_prefix, key) {
                    Some(ts) => ts <= bound,
                    // Unparseable key timestamps are fetched anyway;
                    // the per-record filter still applies.
                    None => true,
                }
            });
        }
        let chunk_size = inner.options.read_chunk_size.max(1);
        let chunks: VecDeque<Vec<String>> = keys
            .chunks(chunk_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let snapshot = inner
            .store
            .get(&inner.keys.snapshot)
            .await?
            .map(|blob| NdjsonReader::new(blob.reader));

        Ok(Self {
            store: inner.store.clone(),
            collection: inner.name.clone(),
            at,
            snapshot,
            chunks,
            buffered: VecDeque::new(),
            read_parallelism: inner.options.read_parallelism.max(1),
        })
    }

    pub async fn next(&mut self) -> Result<Option<StoredRecord>> {
        loop {
            if let Some(reader) = &mut self.snapshot {
                match reader.next_line().await? {
                    Some(line) => match record::parse_record_line(&line.bytes) {
                        Some(rec) => {
                            if self.at.is_some_and(|bound| rec.ts > bound) {
                                continue;
                            }
                            return Ok(Some(rec));
                        }
                        None => {
                            tracing::warn!(
                                collection = %self.collection,
                                offset = line.offset,
                                "skipping malformed snapshot line"
                            );
                            continue;
                        }
                    },
                    None => self.snapshot = None,
                }
                continue;
            }

            if let Some(rec) = self.buffered.pop_front() {
                return Ok(Some(rec));
            }

            let Some(chunk) = self.chunks.pop_front() else {
                return Ok(None);
            };
            self.fetch_chunk(chunk).await?;
        }
    }

    async fn fetch_chunk(&mut self, chunk: Vec<String>) -> Result<()> {
        let store = self.store.clone();
        let bodies = bounded_map(chunk.clone(), self.read_parallelism, move |key: String| {
            let store = store.clone();
            async move { store.get_bytes(&key).await }
        })
        .await?;

        for (key, body) in chunk.iter().zip(bodies) {
            let Some((bytes, _)) = body else {
                // Compaction deleted it after we listed; its records are
                // in the snapshot we already streamed.
                continue;
            };
            match record::parse_batch(&bytes) {
                Some(records) => {
                    self.buffered.extend(records.into_iter().filter(|rec| {
                        self.at.map_or(true, |bound| rec.ts <= bound)
                    }));
                }
                None => {
                    tracing::warn!(
                        collection = %self.collection,
                        key = %key,
                        "skipping malformed mutation blob"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Timestamp embedded in a mutation key: `C.mutation.<ts>-<uuid>`.
fn mutation_key_ts(prefix: &str, key: &str) -> Option<u64> {
    key.strip_prefix(prefix)?
        .split_once('-')
        .and_then(|(ts, _)| ts.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mutation_key_timestamps() {
        assert_eq!(
            mutation_key_ts("c.mutation.", "c.mutation.1700000000123-ab-cd"),
            Some(1_700_000_000_123)
        );
        assert_eq!(mutation_key_ts("c.mutation.", "c.mutation.garbage"), None);
        assert_eq!(mutation_key_ts("c.mutation.", "other.mutation.5-x"), None);
    }
}
