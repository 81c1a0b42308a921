use std::sync::Arc;
use std::time::Instant;

use super::{index, Inner};
use crate::error::Result;
use crate::lock::LeaseEstimate;
use crate::record;
use crate::store::list_all;
use crate::util::fanout::bounded_map;
use crate::util::ndjson::SnapshotWriter;

#[derive(Clone, Copy, Debug, Default)]
pub struct CompactionReport {
    pub mutations_processed: usize,
    pub duration_ms: u64,
    pub index_built: bool,
    pub bloom_built: bool,
}

pub(crate) async fn lease_estimate(inner: &Inner, pass_factor: u64) -> Result<LeaseEstimate> {
    let snapshot_bytes = inner
        .store
        .size(&inner.keys.snapshot)
        .await?
        .unwrap_or(0);
    let mutation_count = list_all(inner.store.as_ref(), &inner.keys.mutation_prefix)
        .await?
        .len() as u64;
    Ok(LeaseEstimate {
        snapshot_bytes,
        mutation_count,
        pass_factor,
    })
}

pub(crate) async fn run(inner: &Arc<Inner>) -> Result<CompactionReport> {
    let start = Instant::now();
    let estimate = lease_estimate(inner, 1).await?;
    let guard = inner.lock.acquire(&inner.keys.lock, estimate).await?;
    let result = run_locked(inner).await;
    inner.lock.release(guard).await;
    let (mutations_processed, index_built, bloom_built) = result?;

    // The snapshot and its sidecars changed under us.
    inner.invalidate_caches();

    let report = CompactionReport {
        mutations_processed,
        duration_ms: start.elapsed().as_millis() as u64,
        index_built,
        bloom_built,
    };
    tracing::info!(
        collection = %inner.name,
        mutations = report.mutations_processed,
        duration_ms = report.duration_ms,
        index = report.index_built,
        bloom = report.bloom_built,
        "compaction finished"
    );
    Ok(report)
}

/// Merge every visible mutation blob into the snapshot and delete it.
/// Loops whole list passes until one observes no mutations, so writes
/// racing with this compaction are still picked up. A page's keys are
/// only deleted after its records are flushed; a crash in between
/// leaves duplicates for the next vacuum, never lost records.
async fn run_locked(inner: &Arc<Inner>) -> Result<(usize, bool, bool)> {
    let store = &inner.store;
    let mut processed = 0usize;

    loop {
        let mut saw_any = false;
        let mut cursor: Option<String> = None;
        let mut writer = SnapshotWriter::new(
            store.clone(),
            inner.keys.snapshot.clone(),
            inner.options.copy_buffer_size,
        );

        loop {
            let page = store
                .list(&inner.keys.mutation_prefix, cursor.as_deref())
                .await?;
            if !page.keys.is_empty() {
                saw_any = true;

                let fetch_store = store.clone();
                let bodies = bounded_map(
                    page.keys.clone(),
                    inner.options.parallelism,
                    move |key: String| {
                        let store = fetch_store.clone();
                        async move { store.get_bytes(&key).await }
                    },
                )
                .await?;

                for (key, body) in page.keys.iter().zip(bodies) {
                    let Some((bytes, _)) = body else { continue };
                    match record::parse_batch(&bytes) {
                        Some(records) => {
                            for rec in &records {
                                writer.push_line(&rec.encode_line()).await?;
                            }
                        }
                        None => {
                            // Unreadable batches are dropped with the
                            // deletion below; their bytes are garbage
                            // either way.
                            tracing::warn!(
                                collection = %inner.name,
                                key = %key,
                                "dropping malformed mutation blob"
                            );
                        }
                    }
                }

                // Page must be durable in the snapshot before its
                // sources disappear.
                writer.flush().await?;
                for chunk in page.keys.chunks(inner.options.delete_chunk_size.max(1)) {
                    store.delete(chunk).await?;
                }
                processed += page.keys.len();
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        writer.flush().await?;
        if !saw_any {
            break;
        }
    }

    let (index_built, bloom_built) = index::rebuild(inner).await?;
    Ok((processed, index_built, bloom_built))
}
