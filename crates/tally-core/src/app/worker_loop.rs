//! WorkerLoop - Delivery Controller
//!
//! # フロー（1 配送ごと）
//! 1. Subscription::next_delivery() で配送を取得
//! 2. VoteProcessor で decode → mark_processing → work → tally → mark_completed
//! 3. 結果から Disposition を決定（Ack / Requeue / Drop）
//! 4. ack または reject で broker に反映
//!
//! The delivery is settled only after the processor has returned, so an ack is
//! never sent before every store mutation succeeded. Deliveries are handled
//! strictly one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span, warn};
use ulid::Ulid;

use super::VoteProcessor;
use super::status::WorkerStats;
use crate::domain::{Disposition, ProcessError};
use crate::ports::{MessageLease, Subscription};

const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// One consumption loop bound to one subscription.
pub struct WorkerLoop {
    instance: usize,
    subscription: Box<dyn Subscription>,
    processor: Arc<VoteProcessor>,
    receive_error_pause: Duration,
    stats: WorkerStats,
}

impl WorkerLoop {
    pub fn new(
        instance: usize,
        subscription: Box<dyn Subscription>,
        processor: Arc<VoteProcessor>,
    ) -> Self {
        Self {
            instance,
            subscription,
            processor,
            receive_error_pause: RECEIVE_ERROR_PAUSE,
            stats: WorkerStats::default(),
        }
    }

    /// Pause after a failed receive before trying again.
    pub fn with_receive_error_pause(mut self, pause: Duration) -> Self {
        self.receive_error_pause = pause;
        self
    }

    /// Consume until shutdown is requested or the broker ends the subscription.
    ///
    /// Shutdown is only observed between deliveries: a delivery already being
    /// processed is always settled first. Dropping the sender counts as a
    /// shutdown request.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        info!(instance = self.instance, "Worker started. Waiting for messages...");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.subscription.next_delivery() => next,
            };

            match next {
                Ok(Some(lease)) => {
                    self.handle(lease).await;
                }
                Ok(None) => {
                    warn!(instance = self.instance, "Subscription closed by broker");
                    break;
                }
                Err(e) => {
                    self.stats.receive_errors += 1;
                    error!(instance = self.instance, error = %e, "Failed to receive delivery");
                    tokio::time::sleep(self.receive_error_pause).await;
                }
            }
        }

        info!(instance = self.instance, stats = ?self.stats, "Worker stopped");
        self.stats
    }

    /// Process and settle one delivery. Returns the disposition that was chosen,
    /// whether or not the broker accepted it.
    pub async fn handle(&mut self, lease: Box<dyn MessageLease>) -> Disposition {
        let span = info_span!(
            "vote",
            instance = self.instance,
            delivery_tag = lease.delivery_tag(),
            redelivered = lease.redelivered(),
            correlation_id = %Ulid::new(),
            job_id = tracing::field::Empty,
            choice = tracing::field::Empty,
        );

        async move {
            self.stats.received += 1;
            let result = self.processor.process(lease.body()).await;

            let disposition = match &result {
                Ok(_) => Disposition::Ack,
                Err(e) => e.disposition(),
            };
            log_result(&result, disposition);

            let settled = match disposition.requeue() {
                None => lease.ack().await,
                Some(requeue) => lease.reject(requeue).await,
            };

            match settled {
                Ok(()) => {
                    self.stats.record(disposition);
                    if let Ok(done) = &result {
                        info!(tally = done.tally, "Completed job {}", done.vote.job_id);
                    }
                }
                Err(e) => {
                    // 次の配送で同じメッセージが再度届く可能性がある
                    self.stats.settle_failures += 1;
                    error!(error = %e, "Failed to settle delivery; it may be redelivered");
                }
            }

            disposition
        }
        .instrument(span)
        .await
    }
}

fn log_result(result: &Result<crate::domain::ProcessedVote, ProcessError>, disposition: Disposition) {
    match result {
        Ok(_) => {}
        Err(ProcessError::Decode(e)) => {
            error!(error = %e, %disposition, "Error parsing message");
        }
        Err(ProcessError::Update(e)) => {
            error!(
                error = %e,
                step = %e.step,
                stage = %e.step.entered_from(),
                %disposition,
                "Error updating store"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Choice, JobId, JobStatus, Step};
    use crate::impls::{InMemoryDeliveryQueue, InMemoryStore, Settlement};
    use crate::ports::{DeliveryQueue, NoDelay, TallyStore, WorkSimulator};
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        queue: Arc<InMemoryDeliveryQueue>,
        store: Arc<InMemoryStore>,
        processor: Arc<VoteProcessor>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_work(Arc::new(NoDelay))
        }

        fn with_work(work: Arc<dyn WorkSimulator>) -> Self {
            let store = Arc::new(InMemoryStore::new());
            let processor = Arc::new(VoteProcessor::new(store.clone(), store.clone(), work));
            Self {
                queue: Arc::new(InMemoryDeliveryQueue::new("votes")),
                store,
                processor,
            }
        }

        async fn vote(&self, job: &str, choice: &str) {
            self.store.insert_job(JobId::new(job), JobStatus::Queued).await;
            let body = format!(r#"{{"job_id":"{job}","choice":"{choice}"}}"#);
            self.queue.publish(body.as_bytes()).await.unwrap();
        }

        async fn worker(&self) -> WorkerLoop {
            let subscription = self.queue.subscribe("test").await.unwrap();
            WorkerLoop::new(0, subscription, self.processor.clone())
        }

        /// Run one loop until the queue has nothing left to hand out.
        async fn drain(&self) -> WorkerStats {
            self.queue.close().await;
            let (_tx, rx) = watch::channel(false);
            self.worker().await.run(rx).await
        }

        async fn dispositions(&self) -> Vec<Disposition> {
            self.queue
                .settlements()
                .await
                .into_iter()
                .map(|s: Settlement| s.disposition)
                .collect()
        }
    }

    #[tokio::test]
    async fn first_vote_creates_tally_and_completes_job() {
        let h = Harness::new();
        h.vote("j1", "yes").await;

        let stats = h.drain().await;

        assert_eq!(stats.acked, 1);
        assert_eq!(h.store.status(&JobId::new("j1")).await, Some(JobStatus::Completed));
        assert_eq!(h.store.tally(&Choice::new("yes")).await, Some(1));
        assert_eq!(h.dispositions().await, vec![Disposition::Ack]);
    }

    #[tokio::test]
    async fn second_vote_for_same_choice_increments() {
        let h = Harness::new();
        h.vote("j1", "yes").await;
        h.vote("j2", "yes").await;

        h.drain().await;

        assert_eq!(h.store.tally(&Choice::new("yes")).await, Some(2));
        assert_eq!(h.store.status(&JobId::new("j2")).await, Some(JobStatus::Completed));
    }

    #[rstest]
    #[case::not_json(b"not-json-bytes".as_slice())]
    #[case::missing_field(br#"{"job_id":"j1"}"#.as_slice())]
    #[case::wrong_type(br#"{"job_id":"j1","choice":7}"#.as_slice())]
    #[case::positional_array(br#"["j1","yes"]"#.as_slice())]
    #[tokio::test]
    async fn malformed_message_is_dropped_without_mutation(#[case] body: &[u8]) {
        let h = Harness::new();
        h.queue.publish(body).await.unwrap();

        let stats = h.drain().await;

        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.acked, 0);
        assert_eq!(h.dispositions().await, vec![Disposition::Drop]);
        assert!(h.store.executed().await.is_empty());
        assert!(h.store.tallies().await.unwrap().is_empty());
        assert_eq!(h.queue.ready_len().await, 0);
    }

    #[tokio::test]
    async fn malformed_message_does_not_block_the_queue() {
        let h = Harness::new();
        h.queue.publish(b"not-json-bytes").await.unwrap();
        h.vote("j1", "yes").await;

        let stats = h.drain().await;

        assert_eq!((stats.dropped, stats.acked), (1, 1));
        assert_eq!(h.store.tally(&Choice::new("yes")).await, Some(1));
    }

    #[rstest]
    #[case::mark_processing(Step::MarkProcessing, 1)]
    #[case::increment_tally(Step::IncrementTally, 1)]
    // tally は ack 前に適用済みなので、再配送で二重にカウントされる
    #[case::mark_completed(Step::MarkCompleted, 2)]
    #[tokio::test]
    async fn store_failure_requeues_and_redelivery_finishes(
        #[case] failing: Step,
        #[case] final_tally: u64,
    ) {
        let h = Harness::new();
        h.vote("j1", "yes").await;
        h.store.fail_next(failing, 1).await;

        let stats = h.drain().await;

        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.acked, 1);
        assert_eq!(
            h.dispositions().await,
            vec![Disposition::Requeue, Disposition::Ack]
        );
        assert_eq!(h.store.status(&JobId::new("j1")).await, Some(JobStatus::Completed));
        assert_eq!(h.store.tally(&Choice::new("yes")).await, Some(final_tally));
    }

    #[tokio::test]
    async fn unreachable_store_sends_no_ack() {
        let h = Harness::new();
        h.vote("j1", "yes").await;
        h.store.set_offline(true).await;

        let mut worker = h.worker().await;
        let mut sub = h.queue.subscribe("observer").await.unwrap();
        let lease = sub.next_delivery().await.unwrap().unwrap();
        let disposition = worker.handle(lease).await;

        assert_eq!(disposition, Disposition::Requeue);
        assert_eq!(h.dispositions().await, vec![Disposition::Requeue]);
        assert_eq!(h.queue.ready_len().await, 1);
        assert_eq!(h.store.status(&JobId::new("j1")).await, Some(JobStatus::Queued));

        h.store.set_offline(false).await;
        h.drain().await;
        assert_eq!(
            h.dispositions().await,
            vec![Disposition::Requeue, Disposition::Ack]
        );
    }

    #[tokio::test]
    async fn failed_ack_does_not_stop_the_loop() {
        let h = Harness::new();
        h.vote("j1", "yes").await;
        h.vote("j2", "no").await;
        h.queue.fail_next_settles(1).await;

        let stats = h.drain().await;

        assert_eq!(stats.received, 2);
        assert_eq!(stats.settle_failures, 1);
        assert_eq!(stats.acked, 1);
        assert_eq!(h.store.tally(&Choice::new("no")).await, Some(1));
        // ack に失敗したメッセージは unacked のまま残る
        assert_eq!(h.queue.unacked_len().await, 1);
    }

    /// Known at-least-once gap: a delivery whose ack is lost after the tally
    /// was applied is counted again when the broker redelivers it.
    #[tokio::test]
    async fn redelivery_after_lost_ack_double_counts() {
        let h = Harness::new();
        h.vote("j1", "yes").await;
        h.queue.fail_next_settles(1).await;

        h.drain().await;
        assert_eq!(h.store.tally(&Choice::new("yes")).await, Some(1));
        assert_eq!(h.store.status(&JobId::new("j1")).await, Some(JobStatus::Completed));

        // consumer の channel が落ちた: broker が unacked を再配送する
        h.queue.recover().await;
        let stats = h.drain().await;

        assert_eq!(stats.acked, 1);
        assert_eq!(h.store.tally(&Choice::new("yes")).await, Some(2));
        assert_eq!(h.store.status(&JobId::new("j1")).await, Some(JobStatus::Completed));
    }

    /// Reads the job status while a redelivered vote is mid-pipeline.
    struct StatusRecorder {
        store: Arc<InMemoryStore>,
        seen: std::sync::Mutex<Vec<Option<JobStatus>>>,
    }

    #[async_trait]
    impl WorkSimulator for StatusRecorder {
        async fn simulate(&self, vote: &crate::domain::VoteMessage) {
            let status = self.store.status(&vote.job_id).await;
            self.seen.lock().unwrap().push(status);
        }
    }

    #[tokio::test]
    async fn redelivered_vote_never_regresses_a_completed_job() {
        let store = Arc::new(InMemoryStore::new());
        let recorder = Arc::new(StatusRecorder {
            store: store.clone(),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let processor = Arc::new(VoteProcessor::new(store.clone(), store.clone(), recorder.clone()));
        let queue = InMemoryDeliveryQueue::new("votes");
        store.insert_job(JobId::new("j1"), JobStatus::Completed).await;
        queue.publish(br#"{"job_id":"j1","choice":"yes"}"#).await.unwrap();
        queue.close().await;

        let (_tx, rx) = watch::channel(false);
        let sub = queue.subscribe("test").await.unwrap();
        WorkerLoop::new(0, sub, processor).run(rx).await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec![Some(JobStatus::Completed)]);
        assert_eq!(store.status(&JobId::new("j1")).await, Some(JobStatus::Completed));
    }

    /// Tracks how many deliveries are inside the pipeline at once.
    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        max: AtomicUsize,
    }

    #[async_trait]
    impl WorkSimulator for InFlight {
        async fn simulate(&self, _vote: &crate::domain::VoteMessage) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn one_loop_handles_deliveries_one_at_a_time() {
        let in_flight = Arc::new(InFlight::default());
        let h = Harness::with_work(in_flight.clone());
        for i in 0..5 {
            h.vote(&format!("j{i}"), "yes").await;
        }

        let stats = h.drain().await;

        assert_eq!(stats.acked, 5);
        assert_eq!(in_flight.max.load(Ordering::SeqCst), 1);
        let tags: Vec<u64> = h
            .queue
            .settlements()
            .await
            .iter()
            .map(|s| s.delivery_tag)
            .collect();
        assert_eq!(tags, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_loop() {
        let h = Harness::new();
        let (tx, rx) = watch::channel(false);
        let worker = h.worker().await;
        let handle = tokio::spawn(worker.run(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop stops promptly")
            .unwrap();
        assert_eq!(stats, WorkerStats::default());
    }

    #[tokio::test]
    async fn dropping_the_shutdown_sender_stops_the_loop() {
        let h = Harness::new();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(h.worker().await.run(rx));

        drop(tx);

        assert!(tokio::time::timeout(Duration::from_secs(1), handle).await.is_ok());
    }
}
