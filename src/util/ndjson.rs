use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::StoreError;
use crate::store::BlobStore;

/// One snapshot line plus its byte span. `offset` and `len` exclude the
/// trailing newline; the next line starts at `offset + len + 1`.
pub struct Line {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl Line {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Streams newline-delimited lines out of an `AsyncRead`, tracking byte
/// offsets so the caller can build a byte-span index over the stream.
pub struct NdjsonReader<R> {
    inner: BufReader<R>,
    offset: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> NdjsonReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            offset: 0,
            done: false,
        }
    }

    pub async fn next_line(&mut self) -> Result<Option<Line>, StoreError> {
        loop {
            if self.done {
                return Ok(None);
            }
            let mut buf = Vec::new();
            let read = self.inner.read_until(b'\n', &mut buf).await?;
            if read == 0 {
                self.done = true;
                return Ok(None);
            }
            let offset = self.offset;
            self.offset += read as u64;
            let had_newline = buf.last() == Some(&b'\n');
            if had_newline {
                buf.pop();
            } else {
                self.done = true;
            }
            // A zero-length line (leading newline or empty file tail)
            // carries no record.
            if buf.is_empty() {
                continue;
            }
            return Ok(Some(Line { offset, bytes: buf }));
        }
    }
}

/// The buffered append path shared by compaction and vacuum: lines are
/// joined with `\n` in memory and flushed through `BlobStore::append`
/// once the buffer crosses `flush_size`. The append contract inserts
/// the separator between flushes, so the produced blob is well-formed
/// NDJSON regardless of flush boundaries.
pub struct SnapshotWriter {
    store: Arc<dyn BlobStore>,
    key: String,
    buf: Vec<u8>,
    flush_size: usize,
    lines: u64,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn BlobStore>, key: impl Into<String>, flush_size: usize) -> Self {
        Self {
            store,
            key: key.into(),
            buf: Vec::with_capacity(flush_size.min(1 << 20)),
            flush_size: flush_size.max(1),
            lines: 0,
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    pub async fn push_line(&mut self, line: &[u8]) -> Result<(), StoreError> {
        if !self.buf.is_empty() {
            self.buf.push(b'\n');
        }
        self.buf.extend_from_slice(line);
        self.lines += 1;
        if self.buf.len() >= self.flush_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.store.append(&self.key, &self.buf).await?;
        self.buf.clear();
        Ok(())
    }
}
