//! WorkSimulator port - 処理時間のフック
//!
//! The worker pauses between marking a job `processing` and counting its vote,
//! standing in for real downstream work. Tests inject [`NoDelay`].

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::VoteMessage;

#[async_trait]
pub trait WorkSimulator: Send + Sync {
    async fn simulate(&self, vote: &VoteMessage);
}

/// Sleep for a fixed duration (500 ms in production).
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl FixedDelay {
    pub const DEFAULT: FixedDelay = FixedDelay(Duration::from_millis(500));
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[async_trait]
impl WorkSimulator for FixedDelay {
    async fn simulate(&self, _vote: &VoteMessage) {
        tokio::time::sleep(self.0).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl WorkSimulator for NoDelay {
    async fn simulate(&self, _vote: &VoteMessage) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Choice, JobId};
    use tokio::time::Instant;

    fn vote() -> VoteMessage {
        VoteMessage::new(JobId::new("j1"), Choice::new("yes"))
    }

    #[tokio::test]
    async fn fixed_delay_waits_at_least_its_duration() {
        let start = Instant::now();
        FixedDelay(Duration::from_millis(50)).simulate(&vote()).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn default_delay_is_half_a_second() {
        assert_eq!(FixedDelay::default().0, Duration::from_millis(500));
    }
}
