//! Coldbase: a serverless-first, log-structured document database over
//! blob storage.
//!
//! Each collection is a handful of blobs: an NDJSON snapshot, pending
//! mutation blobs, a lease-lock blob, and optional index/bloom
//! sidecars. Writers append immutable mutation blobs; compaction folds
//! them into the snapshot; vacuum deduplicates the snapshot; a
//! lease-based lock serializes the two. Readers merge snapshot and
//! mutations with last-write-wins per id. No process holds state the
//! storage does not.

pub mod collection;
pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod record;
pub mod store;
pub mod util;
pub mod vector;

mod lock;

pub use collection::{
    Batch, Collection, CompactionReport, Filter, FindOptions, IndexEntry, RecordStream,
    VacuumReport,
};
pub use config::{
    AutoPolicy, CollectionOptions, LockOptions, MaintenancePolicy, RetryOptions,
};
pub use db::Coldbase;
pub use error::{Error, Result, StoreError};
pub use hooks::{Hooks, MaintenanceOp};
pub use record::StoredRecord;
pub use store::{Blob, BlobStore, BodyReader, ListPage, MemoryStore, Version};
pub use vector::{Metric, SearchHit, SearchOptions, VectorCollection, VectorError, VectorOptions};
