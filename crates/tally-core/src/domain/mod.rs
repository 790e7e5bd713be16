//! Domain model (keys, job status, tallies, messages, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod job;
pub mod message;
pub mod outcome;
pub mod tally;

pub use self::errors::{
    AckError, BrokerError, ConnectivityError, DecodeError, Endpoint, ErrorKind, ProcessError,
    StoreError, UpdateError,
};
pub use self::ids::{Choice, JobId, Key, KeyMarker};
pub use self::job::{Job, JobStatus, UnknownStatus};
pub use self::message::VoteMessage;
pub use self::outcome::{Disposition, ProcessedVote, Stage, Step};
pub use self::tally::VoteTally;
