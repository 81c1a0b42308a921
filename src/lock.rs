use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LockOptions;
use crate::error::{Error, Result, StoreError};
use crate::store::{BlobStore, Version};
use crate::util::clock::now_ms;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockMeta {
    session_id: Uuid,
    expires_at: u64,
}

/// Inputs to the adaptive lease: how much work the holder is about to
/// do. `pass_factor` is 1 for compaction, 2 for vacuum (two streaming
/// passes over the snapshot).
#[derive(Clone, Copy, Debug, Default)]
pub struct LeaseEstimate {
    pub snapshot_bytes: u64,
    pub mutation_count: u64,
    pub pass_factor: u64,
}

/// A held lease. Must be handed back to [`LeaseLock::release`]; if the
/// process dies first, the lease simply expires.
pub struct LeaseGuard {
    key: String,
    session_id: Uuid,
    version: Version,
}

/// Serializes compaction and vacuum across arbitrary processes using
/// only the store's conditional writes. No heartbeat: the lease is
/// sized up front and expires on its own.
pub(crate) struct LeaseLock {
    store: Arc<dyn BlobStore>,
    options: LockOptions,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn BlobStore>, options: LockOptions) -> Self {
        Self { store, options }
    }

    fn lease_ms(&self, estimate: &LeaseEstimate) -> u64 {
        if !self.options.adaptive {
            return self.options.lease_duration_ms;
        }
        let scaled = self
            .options
            .lease_duration_ms
            .saturating_add((estimate.snapshot_bytes as f64 * self.options.lease_per_byte_ms) as u64)
            .saturating_add(
                estimate
                    .mutation_count
                    .saturating_mul(self.options.lease_per_mutation_ms),
            );
        scaled
            .saturating_mul(estimate.pass_factor.max(1))
            .min(self.options.max_lease_duration_ms)
    }

    pub async fn acquire(&self, lock_key: &str, estimate: LeaseEstimate) -> Result<LeaseGuard> {
        let session_id = Uuid::new_v4();
        let lease = self.lease_ms(&estimate);
        let body = lock_body(session_id, now_ms() + lease)?;

        match self.store.put_if_none_match(lock_key, &body).await {
            Ok(version) => {
                tracing::debug!(lock = lock_key, session = %session_id, lease_ms = lease, "lock acquired");
                return Ok(LeaseGuard {
                    key: lock_key.to_string(),
                    session_id,
                    version,
                });
            }
            Err(StoreError::PreconditionFailed { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        // Somebody holds (or held) the lock. Look at it.
        let Some((current, version)) = self.store.get_bytes(lock_key).await? else {
            // It vanished between our attempts; try the create path once
            // more before giving up.
            let version = match self.store.put_if_none_match(lock_key, &body).await {
                Ok(version) => version,
                Err(StoreError::PreconditionFailed { .. }) => return Err(Error::LockActive),
                Err(err) => return Err(err.into()),
            };
            return Ok(LeaseGuard {
                key: lock_key.to_string(),
                session_id,
                version,
            });
        };

        let expired = match serde_json::from_slice::<LockMeta>(&current) {
            Ok(meta) => now_ms() > meta.expires_at,
            Err(err) => {
                // A lock we cannot parse cannot be respected; treat it
                // as dead and go through the same CAS takeover.
                tracing::warn!(lock = lock_key, error = %err, "unparseable lock body, attempting takeover");
                true
            }
        };
        if !expired {
            return Err(Error::LockActive);
        }

        let body = lock_body(session_id, now_ms() + lease)?;
        match self.store.put_if_match(lock_key, &body, &version).await {
            Ok(version) => {
                tracing::debug!(lock = lock_key, session = %session_id, lease_ms = lease, "expired lock taken over");
                Ok(LeaseGuard {
                    key: lock_key.to_string(),
                    session_id,
                    version,
                })
            }
            // Lost the takeover race; do not spin.
            Err(StoreError::PreconditionFailed { .. }) => Err(Error::LockActive),
            Err(err) => Err(err.into()),
        }
    }

    /// Clear the lease. Failures are logged and swallowed — the lease
    /// expires on its own, and the blob is left in place so the next
    /// holder can go through the takeover CAS.
    pub async fn release(&self, guard: LeaseGuard) {
        let body = match lock_body(guard.session_id, 0) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(lock = %guard.key, error = %err, "failed to encode lock release");
                return;
            }
        };
        match self
            .store
            .put_if_match(&guard.key, &body, &guard.version)
            .await
        {
            Ok(_) => {
                tracing::debug!(lock = %guard.key, session = %guard.session_id, "lock released")
            }
            Err(err) => {
                tracing::warn!(lock = %guard.key, session = %guard.session_id, error = %err, "lock release failed, lease will expire")
            }
        }
    }
}

fn lock_body(session_id: Uuid, expires_at: u64) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&LockMeta {
        session_id,
        expires_at,
    })?)
}
