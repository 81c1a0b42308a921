use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Inner;
use crate::error::{Error, Result};
use crate::record;
use crate::util::bloom::{BloomBlob, BloomFilter};
use crate::util::ndjson::NdjsonReader;

/// Byte span of one id's winning line inside the snapshot. Offsets and
/// lengths are bytes, end to end: the same unit the fast-path `get`
/// slices with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub offset: u64,
    pub length: u64,
}

/// One streaming pass over the snapshot that rewrites `.idx` and
/// `.bloom`. Runs at the tail of compaction and vacuum, still under the
/// lease; the blobs describe exactly the snapshot state, which is why
/// readers may only trust them while zero mutations are pending.
pub(crate) async fn rebuild(inner: &Inner) -> Result<(bool, bool)> {
    let want_index = inner.options.use_index;
    let want_bloom = inner.options.use_bloom_filter;
    if !want_index && !want_bloom {
        return Ok((false, false));
    }

    struct Seen {
        entry: IndexEntry,
        deleted: bool,
    }
    let mut seen: HashMap<String, Seen> = HashMap::new();

    if let Some(blob) = inner.store.get(&inner.keys.snapshot).await? {
        let mut reader = NdjsonReader::new(blob.reader);
        while let Some(line) = reader.next_line().await? {
            let Some(rec) = record::parse_record_line(&line.bytes) else {
                continue;
            };
            let deleted = rec.is_tombstone();
            seen.insert(
                rec.id,
                Seen {
                    entry: IndexEntry {
                        offset: line.offset,
                        length: line.len(),
                    },
                    deleted,
                },
            );
        }
    }

    if want_index {
        let live: HashMap<&str, &IndexEntry> = seen
            .iter()
            .filter(|(_, s)| !s.deleted)
            .map(|(id, s)| (id.as_str(), &s.entry))
            .collect();
        let body = serde_json::to_vec(&live)?;
        inner.store.put(&inner.keys.index, &body).await?;
    }

    if want_bloom {
        let mut filter = BloomFilter::new(
            inner.options.bloom_expected_items,
            inner.options.bloom_false_positive_rate,
        );
        for (id, s) in &seen {
            if !s.deleted {
                filter.insert(id);
            }
        }
        let body = serde_json::to_vec(&filter.to_blob())?;
        inner.store.put(&inner.keys.bloom, &body).await?;
    }

    Ok((want_index, want_bloom))
}

pub(crate) fn parse_index(bytes: &[u8]) -> Result<HashMap<String, IndexEntry>> {
    serde_json::from_slice(bytes).map_err(Error::from)
}

pub(crate) fn parse_bloom(bytes: &[u8]) -> Result<BloomFilter> {
    let blob: BloomBlob = serde_json::from_slice(bytes)?;
    BloomFilter::from_blob(&blob)
}
