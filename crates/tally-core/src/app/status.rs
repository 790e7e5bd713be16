//! Status - ワーカーごとの処理カウンタ

use serde::{Deserialize, Serialize};

use crate::domain::Disposition;

/// What one worker loop did with the deliveries it received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub received: u64,
    pub acked: u64,
    /// Rejected without requeue (malformed payloads).
    pub dropped: u64,
    /// Rejected with requeue (store failures).
    pub requeued: u64,
    /// Ack/reject calls the broker did not accept.
    pub settle_failures: u64,
    pub receive_errors: u64,
}

impl WorkerStats {
    pub(crate) fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Ack => self.acked += 1,
            Disposition::Requeue => self.requeued += 1,
            Disposition::Drop => self.dropped += 1,
        }
    }

    /// Sum of several loops' counters.
    pub fn merge(mut self, other: WorkerStats) -> Self {
        self.received += other.received;
        self.acked += other.acked;
        self.dropped += other.dropped;
        self.requeued += other.requeued;
        self.settle_failures += other.settle_failures;
        self.receive_errors += other.receive_errors;
        self
    }
}
