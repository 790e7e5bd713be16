//! Vote tally rows.

use serde::{Deserialize, Serialize};

use super::ids::Choice;

/// One `votes` row: running count for a choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub choice: Choice,
    pub count: u64,
}

impl VoteTally {
    pub fn new(choice: Choice, count: u64) -> Self {
        Self { choice, count }
    }
}
