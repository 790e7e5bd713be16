//! VoteProcessor - decode → mark_processing → work → tally → mark_completed
//!
//! The processor runs the store side of one delivery and reports how far it
//! got. It never touches the broker: settling the delivery is the worker
//! loop's job, and happens only after this returns.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{
    ProcessError, ProcessedVote, Stage, Step, UpdateError, VoteMessage,
};
use crate::ports::{JobStore, TallyStore, WorkSimulator};

/// Dependencies are injected; nothing here holds a global connection.
pub struct VoteProcessor {
    jobs: Arc<dyn JobStore>,
    tallies: Arc<dyn TallyStore>,
    work: Arc<dyn WorkSimulator>,
}

impl VoteProcessor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        tallies: Arc<dyn TallyStore>,
        work: Arc<dyn WorkSimulator>,
    ) -> Self {
        Self { jobs, tallies, work }
    }

    /// Decode a delivery body and apply it.
    ///
    /// Records `job_id` and `choice` on the current span once they are known.
    pub async fn process(&self, body: &[u8]) -> Result<ProcessedVote, ProcessError> {
        let vote = VoteMessage::decode(body)?;

        let span = tracing::Span::current();
        span.record("job_id", tracing::field::display(&vote.job_id));
        span.record("choice", tracing::field::display(&vote.choice));
        debug!(stage = %Stage::Decoded, "Decoded vote");
        info!("Processing job {}: {}", vote.job_id, vote.choice);

        Ok(self.apply(vote).await?)
    }

    /// Run the store steps for an already decoded vote.
    ///
    /// Stops at the first failing step; the steps before it are not undone.
    pub async fn apply(&self, vote: VoteMessage) -> Result<ProcessedVote, UpdateError> {
        let rows = self
            .jobs
            .mark_processing(&vote.job_id)
            .await
            .map_err(|e| UpdateError::new(Step::MarkProcessing, e))?;
        if rows == 0 {
            // 存在しない job_id、または既に completed（再配送）
            warn!(job_id = %vote.job_id, "No queued job matched; continuing");
        }
        debug!(stage = %Stage::MarkedProcessing, "Job marked processing");

        self.work.simulate(&vote).await;
        debug!(stage = %Stage::WorkSimulated, "Work finished");

        let tally = self
            .tallies
            .increment_tally(&vote.choice)
            .await
            .map_err(|e| UpdateError::new(Step::IncrementTally, e))?;
        debug!(stage = %Stage::Tallied, tally, "Vote counted");

        self.jobs
            .mark_completed(&vote.job_id)
            .await
            .map_err(|e| UpdateError::new(Step::MarkCompleted, e))?;
        debug!(stage = %Stage::MarkedCompleted, "Job marked completed");

        Ok(ProcessedVote { vote, tally })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Choice, DecodeError, JobId, JobStatus, StoreError};
    use crate::impls::InMemoryStore;
    use crate::ports::NoDelay;
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::Mutex;

    fn processor(store: &Arc<InMemoryStore>) -> VoteProcessor {
        VoteProcessor::new(store.clone(), store.clone(), Arc::new(NoDelay))
    }

    #[tokio::test]
    async fn runs_every_step_in_order() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_job(JobId::new("j1"), JobStatus::Queued).await;

        let done = processor(&store)
            .process(br#"{"job_id":"j1","choice":"yes"}"#)
            .await
            .unwrap();

        assert_eq!(done.tally, 1);
        assert_eq!(
            store.executed().await,
            vec![Step::MarkProcessing, Step::IncrementTally, Step::MarkCompleted]
        );
        assert_eq!(store.status(&JobId::new("j1")).await, Some(JobStatus::Completed));
    }

    /// Records the job status it sees while "working".
    struct ObservingWork {
        store: Arc<InMemoryStore>,
        seen: Mutex<Vec<(Option<JobStatus>, Option<u64>)>>,
    }

    #[async_trait]
    impl WorkSimulator for ObservingWork {
        async fn simulate(&self, vote: &VoteMessage) {
            let status = self.store.status(&vote.job_id).await;
            let tally = self.store.tally(&vote.choice).await;
            self.seen.lock().unwrap().push((status, tally));
        }
    }

    #[tokio::test]
    async fn work_runs_after_processing_and_before_tally() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_job(JobId::new("j1"), JobStatus::Queued).await;
        let work = Arc::new(ObservingWork {
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let processor = VoteProcessor::new(store.clone(), store.clone(), work.clone());

        processor
            .apply(VoteMessage::new(JobId::new("j1"), Choice::new("yes")))
            .await
            .unwrap();

        assert_eq!(
            *work.seen.lock().unwrap(),
            vec![(Some(JobStatus::Processing), None)]
        );
    }

    #[tokio::test]
    async fn malformed_body_touches_nothing() {
        let store = Arc::new(InMemoryStore::new());

        let err = processor(&store).process(b"not-json-bytes").await.unwrap_err();

        assert!(matches!(err, ProcessError::Decode(DecodeError::Malformed(_))));
        assert!(store.executed().await.is_empty());
    }

    #[rstest]
    #[case::mark_processing(Step::MarkProcessing, vec![], None)]
    #[case::increment_tally(Step::IncrementTally, vec![Step::MarkProcessing], None)]
    #[case::mark_completed(
        Step::MarkCompleted,
        vec![Step::MarkProcessing, Step::IncrementTally],
        Some(1)
    )]
    #[tokio::test]
    async fn failing_step_aborts_the_rest(
        #[case] failing: Step,
        #[case] executed: Vec<Step>,
        #[case] tally: Option<u64>,
    ) {
        let store = Arc::new(InMemoryStore::new());
        store.insert_job(JobId::new("j1"), JobStatus::Queued).await;
        store.fail_next(failing, 1).await;

        let err = processor(&store)
            .apply(VoteMessage::new(JobId::new("j1"), Choice::new("yes")))
            .await
            .unwrap_err();

        assert_eq!(err.step, failing);
        assert!(matches!(err.source, StoreError::Unavailable(_)));
        assert_eq!(store.executed().await, executed);
        assert_eq!(store.tally(&Choice::new("yes")).await, tally);
        assert_ne!(store.status(&JobId::new("j1")).await, Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn unknown_job_still_counts_the_vote() {
        let store = Arc::new(InMemoryStore::new());

        let done = processor(&store)
            .apply(VoteMessage::new(JobId::new("ghost"), Choice::new("no")))
            .await
            .unwrap();

        assert_eq!(done.tally, 1);
        assert_eq!(store.status(&JobId::new("ghost")).await, None);
    }
}
