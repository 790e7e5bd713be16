//! InMemoryStore - 開発・テスト用の正本
//!
//! A single `tokio::sync::Mutex` guards all rows, so every statement is atomic
//! the same way a single SQL statement is.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Choice, JobId, JobStatus, Step, StoreError, VoteTally};
use crate::ports::{JobStore, TallyStore};

#[derive(Default)]
struct StoreState {
    jobs: HashMap<JobId, JobStatus>,
    votes: BTreeMap<Choice, u64>,

    /// Statements that executed successfully, in order.
    executed: Vec<Step>,

    /// Remaining injected failures per step.
    faults: HashMap<Step, usize>,

    /// Every call fails while set.
    offline: bool,
}

impl StoreState {
    fn check(&mut self, step: Step) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("in-memory store is offline".into()));
        }
        if let Some(remaining) = self.faults.get_mut(&step)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StoreError::Unavailable(format!("injected failure on {step}")));
        }
        Ok(())
    }

    fn advance(&mut self, job_id: &JobId, next: JobStatus) -> u64 {
        match self.jobs.get_mut(job_id) {
            Some(status) if status.can_advance_to(next) => {
                *status = next;
                1
            }
            _ => 0,
        }
    }
}

/// In-memory `jobs` + `votes`.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a job row, as the producer would.
    pub async fn insert_job(&self, job_id: JobId, status: JobStatus) {
        self.state.lock().await.jobs.insert(job_id, status);
    }

    /// Current status, bypassing fault injection.
    pub async fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.state.lock().await.jobs.get(job_id).copied()
    }

    /// Current count, bypassing fault injection. `None` when no row exists.
    pub async fn tally(&self, choice: &Choice) -> Option<u64> {
        self.state.lock().await.votes.get(choice).copied()
    }

    /// Make the next `times` calls of `step` fail.
    pub async fn fail_next(&self, step: Step, times: usize) {
        *self.state.lock().await.faults.entry(step).or_default() += times;
    }

    /// Simulate losing (or regaining) the store connection.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Statements that executed successfully, in order.
    pub async fn executed(&self) -> Vec<Step> {
        self.state.lock().await.executed.clone()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn mark_processing(&self, job_id: &JobId) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.check(Step::MarkProcessing)?;
        let rows = state.advance(job_id, JobStatus::Processing);
        state.executed.push(Step::MarkProcessing);
        Ok(rows)
    }

    async fn mark_completed(&self, job_id: &JobId) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.check(Step::MarkCompleted)?;
        let rows = state.advance(job_id, JobStatus::Completed);
        state.executed.push(Step::MarkCompleted);
        Ok(rows)
    }

    async fn job_status(&self, job_id: &JobId) -> Result<Option<JobStatus>, StoreError> {
        let state = self.state.lock().await;
        if state.offline {
            return Err(StoreError::Unavailable("in-memory store is offline".into()));
        }
        Ok(state.jobs.get(job_id).copied())
    }
}

#[async_trait]
impl TallyStore for InMemoryStore {
    async fn increment_tally(&self, choice: &Choice) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.check(Step::IncrementTally)?;
        let count = state.votes.entry(choice.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        state.executed.push(Step::IncrementTally);
        Ok(count)
    }

    async fn tallies(&self) -> Result<Vec<VoteTally>, StoreError> {
        let state = self.state.lock().await;
        if state.offline {
            return Err(StoreError::Unavailable("in-memory store is offline".into()));
        }
        Ok(state
            .votes
            .iter()
            .map(|(choice, count)| VoteTally::new(choice.clone(), *count))
            .collect())
    }
}
