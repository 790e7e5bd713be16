//! Store ports - jobs と votes の正本
//!
//! 実装:
//! - `tally-pg`: PostgresStore（本番用）
//! - `impls::InMemoryStore`（開発・テスト用）

use async_trait::async_trait;

use crate::domain::{Choice, JobId, JobStatus, StoreError, VoteTally};

/// Job State Updater.
///
/// Both mutations are single atomic statements and succeed when no row
/// matches; they return the number of rows changed so callers can log a miss.
/// Neither ever moves a job backwards.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// `processing` for the job, unless it is already `completed`.
    async fn mark_processing(&self, job_id: &JobId) -> Result<u64, StoreError>;

    async fn mark_completed(&self, job_id: &JobId) -> Result<u64, StoreError>;

    async fn job_status(&self, job_id: &JobId) -> Result<Option<JobStatus>, StoreError>;
}

/// Tally Aggregator.
#[async_trait]
pub trait TallyStore: Send + Sync {
    /// Atomic upsert: insert with count 1 or add 1. Returns the new count.
    ///
    /// Must be one store operation (never read-then-write) so concurrent
    /// workers voting for the same choice cannot lose updates.
    async fn increment_tally(&self, choice: &Choice) -> Result<u64, StoreError>;

    /// All tallies ordered by choice.
    async fn tallies(&self) -> Result<Vec<VoteTally>, StoreError>;
}
