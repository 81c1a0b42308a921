mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::StoreError;

/// Opaque blob version: an ETag, a filesystem mtime, a counter —
/// whatever the driver can compare exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version(pub String);

pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// A fetched blob: a streaming body plus the version it was read at.
pub struct Blob {
    pub reader: BodyReader,
    pub version: Version,
}

#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_cursor: Option<String>,
}

/// The storage contract the engine runs on. Keys are flat utf-8
/// strings; the only structural requirement is that
/// `list("C.mutation.")` returns exactly collection `C`'s mutation
/// blobs.
///
/// The two conditional writes are the only primitives the lock manager
/// depends on; a store that cannot provide them cannot host the engine
/// safely.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Unconditional overwrite.
    async fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError>;

    /// Create-only write; `PreconditionFailed` if the key exists.
    async fn put_if_none_match(&self, key: &str, body: &[u8]) -> Result<Version, StoreError>;

    /// Replace-only write; `PreconditionFailed` if the current version
    /// differs from `version` or the key is absent.
    async fn put_if_match(
        &self,
        key: &str,
        body: &[u8],
        version: &Version,
    ) -> Result<Version, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError>;

    /// Unordered key enumeration; iterate `next_cursor` until `None`
    /// for a complete listing.
    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, StoreError>;

    /// Idempotent; absent keys are ignored. Drivers handle chunking to
    /// their API limits.
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Content length in bytes, or `None` if absent.
    async fn size(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Logical append. An existing non-empty key yields
    /// `old ++ "\n" ++ data`; an absent or zero-byte key yields just
    /// `data`.
    async fn append(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Convenience wrapper that drains `get` into memory. Intended for
    /// small blobs (lock, index, bloom) — the engine streams the
    /// snapshot through `get` directly.
    async fn get_bytes(&self, key: &str) -> Result<Option<(Vec<u8>, Version)>, StoreError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(mut blob) => {
                let mut body = Vec::new();
                blob.reader.read_to_end(&mut body).await?;
                Ok(Some((body, blob.version)))
            }
        }
    }
}

/// Drain every key under `prefix` across list pages.
pub(crate) async fn list_all(
    store: &dyn BlobStore,
    prefix: &str,
) -> Result<Vec<String>, StoreError> {
    let mut keys = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.list(prefix, cursor.as_deref()).await?;
        keys.extend(page.keys);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(keys),
        }
    }
}
