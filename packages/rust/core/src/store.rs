//! Result store seam between the pipeline and persistence.

use async_trait::async_trait;

use sitesort_shared::{BatchRecord, ClassificationResult, Domain, Result};
use sitesort_storage::Storage;

/// Durable storage the pipeline reads prior results from and writes to.
///
/// Implementations serialize writes; reads may run concurrently.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Latest result for `domain` whose label is not `Error`.
    async fn get_existing(&self, domain: &Domain) -> Result<Option<ClassificationResult>>;

    /// Append one result row.
    async fn insert(&self, result: &ClassificationResult) -> Result<()>;

    /// Record a newly started batch.
    async fn create_batch(&self, batch: &BatchRecord) -> Result<()>;

    /// Write a batch's terminal status and counters.
    async fn complete_batch(&self, batch: &BatchRecord) -> Result<()>;
}

#[async_trait]
impl ResultStore for Storage {
    async fn get_existing(&self, domain: &Domain) -> Result<Option<ClassificationResult>> {
        Storage::get_existing(self, domain).await
    }

    async fn insert(&self, result: &ClassificationResult) -> Result<()> {
        self.insert_result(result).await.map(|_| ())
    }

    async fn create_batch(&self, batch: &BatchRecord) -> Result<()> {
        Storage::create_batch(self, batch).await
    }

    async fn complete_batch(&self, batch: &BatchRecord) -> Result<()> {
        Storage::complete_batch(self, batch).await
    }
}
