mod memory;

use std::{future::Future, time::Duration};

use thiserror::Error;

use crate::telemetry::{Reading, StoredReading};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only, time-ordered persistence of readings.
///
/// Implementations must accept concurrent `append` and `recent` calls. Each
/// append is atomic on its own; there is no cross-record transaction apart
/// from `append_batch`.
pub trait Store: Send + Sync + 'static {
    /// Persists one reading, assigning the timestamp when it has none.
    fn append(
        &self,
        reading: Reading,
    ) -> impl Future<Output = Result<StoredReading, StoreError>> + Send;

    /// Persists all readings or none of them. Results keep input order.
    fn append_batch(
        &self,
        readings: Vec<Reading>,
    ) -> impl Future<Output = Result<Vec<StoredReading>, StoreError>> + Send;

    /// Up to `min(limit, cap)` readings, newest first. Equal timestamps are
    /// ordered by insertion, latest first.
    fn recent(
        &self,
        limit: usize,
        cap: usize,
    ) -> impl Future<Output = Result<Vec<StoredReading>, StoreError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
