use thiserror::Error;

/// All error conditions the cache surfaces to callers.
///
/// `Corruption` is intentionally absent: per-record WAL corruption is a log
/// event plus a file truncation inside [`crate::engine::loader::CacheLoader`],
/// never a value returned to the caller (see the loader's corruption-tolerance
/// contract).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache-max-memory-size exceeded: ({current}/{max})")]
    MemorySizeLimitExceeded { current: u64, max: u64 },

    #[error("field type conflict")]
    FieldTypeConflict,

    #[error("unknown field type")]
    UnknownFieldType,

    #[error("snapshot in progress")]
    SnapshotInProgress,

    #[error("shard count {0} is invalid (must be a nonzero power of two)")]
    InvalidShardCount(usize),

    #[error("corrupt WAL record near offset {offset}")]
    TornRecord { offset: i64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
