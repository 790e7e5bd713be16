//! Outcome model: pipeline stages, store steps, and delivery dispositions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::message::VoteMessage;

/// Per-delivery state machine.
///
/// received → decoded → marked_processing → work_simulated → tallied →
/// marked_completed → acknowledged. A delivery can leave the chain at any gate
/// by being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Decoded,
    MarkedProcessing,
    WorkSimulated,
    Tallied,
    MarkedCompleted,
    Acknowledged,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Decoded => "decoded",
            Stage::MarkedProcessing => "marked_processing",
            Stage::WorkSimulated => "work_simulated",
            Stage::Tallied => "tallied",
            Stage::MarkedCompleted => "marked_completed",
            Stage::Acknowledged => "acknowledged",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The store mutations, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    MarkProcessing,
    IncrementTally,
    MarkCompleted,
}

impl Step {
    /// Stage the delivery was in when this step ran.
    pub fn entered_from(self) -> Stage {
        match self {
            Step::MarkProcessing => Stage::Decoded,
            Step::IncrementTally => Stage::WorkSimulated,
            Step::MarkCompleted => Stage::Tallied,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::MarkProcessing => f.write_str("mark_processing"),
            Step::IncrementTally => f.write_str("increment_tally"),
            Step::MarkCompleted => f.write_str("mark_completed"),
        }
    }
}

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Fully handled; remove from the queue.
    Ack,
    /// Reject with requeue; the broker redelivers later.
    Requeue,
    /// Reject without requeue; the payload can never succeed.
    Drop,
}

impl Disposition {
    /// `requeue` flag for a reject. `None` for an ack.
    pub fn requeue(self) -> Option<bool> {
        match self {
            Disposition::Ack => None,
            Disposition::Requeue => Some(true),
            Disposition::Drop => Some(false),
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Ack => f.write_str("ack"),
            Disposition::Requeue => f.write_str("requeue"),
            Disposition::Drop => f.write_str("drop"),
        }
    }
}

/// Result of a vote that went through every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedVote {
    pub vote: VoteMessage,
    /// Tally for the vote's choice right after the increment.
    pub tally: u64,
}
