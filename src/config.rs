const DEFAULT_MAX_MUTATION_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_COPY_BUFFER_SIZE: usize = 64 * 1024;
const DEFAULT_DELETE_CHUNK_SIZE: usize = 100;
const DEFAULT_PARALLELISM: usize = 5;
const DEFAULT_READ_CHUNK_SIZE: usize = 50;
const DEFAULT_READ_PARALLELISM: usize = 10;
const DEFAULT_VACUUM_CACHE_SIZE: usize = 100_000;
const DEFAULT_BLOOM_EXPECTED_ITEMS: usize = 10_000;
const DEFAULT_BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;
const DEFAULT_LEASE_DURATION_MS: u64 = 30_000;
const DEFAULT_MAX_LEASE_DURATION_MS: u64 = 300_000;
const DEFAULT_LEASE_PER_BYTE_MS: f64 = 0.000_1;
const DEFAULT_LEASE_PER_MUTATION_MS: u64 = 50;

/// Per-collection tuning. Every knob has the engine default; construct
/// with struct update syntax over `Default`.
#[derive(Clone, Debug)]
pub struct CollectionOptions {
    /// Upper bound on one serialized mutation batch, checked before any
    /// storage call.
    pub max_mutation_size: usize,
    /// Flush threshold of the buffered append path used by compaction
    /// and vacuum.
    pub copy_buffer_size: usize,
    /// How many processed mutation keys are deleted per store call.
    pub delete_chunk_size: usize,
    /// In-flight blob fetches during compaction.
    pub parallelism: usize,
    /// Mutation blobs fetched per batch on the read path.
    pub read_chunk_size: usize,
    /// In-flight fetches within one read batch.
    pub read_parallelism: usize,
    /// Ids tracked exactly by vacuum; everything evicted past this is
    /// kept conservatively.
    pub vacuum_cache_size: usize,
    pub use_index: bool,
    pub use_bloom_filter: bool,
    pub bloom_expected_items: usize,
    pub bloom_false_positive_rate: f64,
    /// Name of a unix-millis field inside `data`; records whose value is
    /// in the past are invisible to reads.
    pub ttl_field: Option<String>,
    pub auto_compact: MaintenancePolicy,
    pub auto_vacuum: MaintenancePolicy,
    pub lock: LockOptions,
    /// When set, transient store failures on the write path are retried
    /// with exponential backoff and jitter.
    pub retry: Option<RetryOptions>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            max_mutation_size: DEFAULT_MAX_MUTATION_SIZE,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            delete_chunk_size: DEFAULT_DELETE_CHUNK_SIZE,
            parallelism: DEFAULT_PARALLELISM,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            read_parallelism: DEFAULT_READ_PARALLELISM,
            vacuum_cache_size: DEFAULT_VACUUM_CACHE_SIZE,
            use_index: false,
            use_bloom_filter: false,
            bloom_expected_items: DEFAULT_BLOOM_EXPECTED_ITEMS,
            bloom_false_positive_rate: DEFAULT_BLOOM_FALSE_POSITIVE_RATE,
            ttl_field: None,
            auto_compact: MaintenancePolicy::Disabled,
            auto_vacuum: MaintenancePolicy::Disabled,
            lock: LockOptions::default(),
            retry: None,
        }
    }
}

/// Lease sizing for the maintenance lock.
#[derive(Clone, Debug)]
pub struct LockOptions {
    pub lease_duration_ms: u64,
    pub max_lease_duration_ms: u64,
    /// Scale the lease with snapshot size and mutation backlog instead
    /// of using the flat duration.
    pub adaptive: bool,
    pub lease_per_byte_ms: f64,
    pub lease_per_mutation_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            max_lease_duration_ms: DEFAULT_MAX_LEASE_DURATION_MS,
            adaptive: true,
            lease_per_byte_ms: DEFAULT_LEASE_PER_BYTE_MS,
            lease_per_mutation_ms: DEFAULT_LEASE_PER_MUTATION_MS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

/// When maintenance fires after a write.
#[derive(Clone, Debug)]
pub enum MaintenancePolicy {
    Disabled,
    /// Fire unconditionally after every write.
    Always,
    Auto(AutoPolicy),
}

impl MaintenancePolicy {
    pub fn is_disabled(&self) -> bool {
        matches!(self, MaintenancePolicy::Disabled)
    }
}

#[derive(Clone, Debug)]
pub struct AutoPolicy {
    /// Chance in `[0, 1]` that a write schedules this operation.
    pub probability: f64,
    /// Skip unless at least this many mutation blobs are pending.
    /// Zero disables the check.
    pub mutation_threshold: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Vacuum only: chance of rolling a vacuum right after an
    /// auto-compaction succeeded.
    pub after_compact_probability: f64,
}

impl AutoPolicy {
    /// Compaction preset for short-lived serverless invocations.
    pub fn serverless_compact() -> Self {
        Self {
            probability: 0.10,
            mutation_threshold: 5,
            max_retries: 2,
            retry_delay_ms: 1_000,
            after_compact_probability: 0.0,
        }
    }

    /// Vacuum preset for short-lived serverless invocations.
    pub fn serverless_vacuum() -> Self {
        Self {
            probability: 0.01,
            mutation_threshold: 0,
            max_retries: 2,
            retry_delay_ms: 1_000,
            after_compact_probability: 0.10,
        }
    }
}
