use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Blob, BlobStore, ListPage, Version};
use crate::error::StoreError;

const DEFAULT_PAGE_SIZE: usize = 1_000;

#[derive(Clone)]
struct Entry {
    body: Vec<u8>,
    version: u64,
}

/// In-process `BlobStore` with contract-exact conditional writes and
/// append semantics. Backs the test suite and is useful as an ephemeral
/// database for embedders.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<State>>,
    page_size: usize,
}

struct State {
    blobs: BTreeMap<String, Entry>,
    next_version: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// A smaller page size forces cursor iteration; tests use this to
    /// exercise the paging path.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                blobs: BTreeMap::new(),
                next_version: 1,
            })),
            page_size: page_size.max(1),
        }
    }

    /// Number of stored blobs, for test assertions.
    pub fn blob_count(&self) -> usize {
        self.inner.lock().blobs.len()
    }

    /// Raw body of a blob, for test assertions.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().blobs.get(key).map(|e| e.body.clone())
    }

    fn bump(state: &mut State) -> u64 {
        let v = state.next_version;
        state.next_version += 1;
        v
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        let version = Self::bump(&mut state);
        state.blobs.insert(
            key.to_string(),
            Entry {
                body: body.to_vec(),
                version,
            },
        );
        Ok(())
    }

    async fn put_if_none_match(&self, key: &str, body: &[u8]) -> Result<Version, StoreError> {
        let mut state = self.inner.lock();
        if state.blobs.contains_key(key) {
            return Err(StoreError::PreconditionFailed {
                key: key.to_string(),
            });
        }
        let version = Self::bump(&mut state);
        state.blobs.insert(
            key.to_string(),
            Entry {
                body: body.to_vec(),
                version,
            },
        );
        Ok(Version(version.to_string()))
    }

    async fn put_if_match(
        &self,
        key: &str,
        body: &[u8],
        version: &Version,
    ) -> Result<Version, StoreError> {
        let mut state = self.inner.lock();
        let current = match state.blobs.get(key) {
            Some(entry) => entry.version.to_string(),
            None => {
                return Err(StoreError::PreconditionFailed {
                    key: key.to_string(),
                })
            }
        };
        if current != version.0 {
            return Err(StoreError::PreconditionFailed {
                key: key.to_string(),
            });
        }
        let next = Self::bump(&mut state);
        state.blobs.insert(
            key.to_string(),
            Entry {
                body: body.to_vec(),
                version: next,
            },
        );
        Ok(Version(next.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError> {
        let state = self.inner.lock();
        Ok(state.blobs.get(key).map(|entry| Blob {
            reader: Box::new(Cursor::new(entry.body.clone())),
            version: Version(entry.version.to_string()),
        }))
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>) -> Result<ListPage, StoreError> {
        let state = self.inner.lock();
        let mut keys: Vec<String> = state
            .blobs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| match cursor {
                Some(after) => k.as_str() > after,
                None => true,
            })
            .map(|(k, _)| k.clone())
            .take(self.page_size + 1)
            .collect();
        let next_cursor = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next_cursor })
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        for key in keys {
            state.blobs.remove(key);
        }
        Ok(())
    }

    async fn size(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let state = self.inner.lock();
        Ok(state.blobs.get(key).map(|e| e.body.len() as u64))
    }

    async fn append(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        let version = Self::bump(&mut state);
        match state.blobs.get_mut(key) {
            Some(entry) if !entry.body.is_empty() => {
                entry.body.push(b'\n');
                entry.body.extend_from_slice(data);
                entry.version = version;
            }
            Some(entry) => {
                entry.body.extend_from_slice(data);
                entry.version = version;
            }
            None => {
                state.blobs.insert(
                    key.to_string(),
                    Entry {
                        body: data.to_vec(),
                        version,
                    },
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conditional_writes() {
        let store = MemoryStore::new();
        let v1 = store.put_if_none_match("k", b"a").await.unwrap();
        assert!(store.put_if_none_match("k", b"b").await.is_err());

        let v2 = store.put_if_match("k", b"b", &v1).await.unwrap();
        assert_ne!(v1, v2);
        // Stale version loses.
        assert!(store.put_if_match("k", b"c", &v1).await.is_err());
        // Absent key loses.
        assert!(store.put_if_match("gone", b"c", &v2).await.is_err());
    }

    #[tokio::test]
    async fn append_inserts_newline_separator() {
        let store = MemoryStore::new();
        store.append("log", b"one").await.unwrap();
        store.append("log", b"two").await.unwrap();
        assert_eq!(store.raw("log").unwrap(), b"one\ntwo");

        // Zero-byte existing key gets no leading newline.
        store.put("fresh", b"").await.unwrap();
        store.append("fresh", b"first").await.unwrap();
        assert_eq!(store.raw("fresh").unwrap(), b"first");
    }

    #[tokio::test]
    async fn list_pages_completely() {
        let store = MemoryStore::with_page_size(3);
        for i in 0..10 {
            store.put(&format!("p.{i:02}"), b"x").await.unwrap();
        }
        store.put("q.00", b"x").await.unwrap();

        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store.list("p.", cursor.as_deref()).await.unwrap();
            keys.extend(page.keys);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(keys.len(), 10);
        assert!(keys.iter().all(|k| k.starts_with("p.")));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store.put("a", b"1").await.unwrap();
        let keys = vec!["a".to_string(), "missing".to_string()];
        store.delete(&keys).await.unwrap();
        store.delete(&keys).await.unwrap();
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn size_and_get_bytes() {
        let store = MemoryStore::new();
        assert_eq!(store.size("k").await.unwrap(), None);
        store.put("k", b"hello").await.unwrap();
        assert_eq!(store.size("k").await.unwrap(), Some(5));
        let (body, _) = store.get_bytes("k").await.unwrap().unwrap();
        assert_eq!(body, b"hello");
    }
}
