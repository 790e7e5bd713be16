//! Errors - エラー型と分類
//!
//! Every failure the worker can meet is classified by [`ErrorKind`]; the
//! classification alone decides what happens to the delivery.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use super::outcome::{Disposition, Step};

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（requeue すれば成功しうる）
/// - Permanent: 恒久的なエラー（何度配送しても失敗する）
/// - Infrastructure: 起動時の接続エラー（プロセスを止める）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// The payload is not a `{job_id, choice}` object.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not a valid vote message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("field `{field}` must not be empty")]
    EmptyField { field: &'static str },
}

/// A store call failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected statement: {0}")]
    Rejected(String),
}

/// A store failure during one pipeline step.
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct UpdateError {
    pub step: Step,
    #[source]
    pub source: StoreError,
}

impl UpdateError {
    pub fn new(step: Step, source: StoreError) -> Self {
        Self { step, source }
    }
}

/// Failure to settle (ack or reject) a delivery with the broker.
#[derive(Debug, Error)]
#[error("failed to {action} delivery {delivery_tag}: {message}")]
pub struct AckError {
    pub action: Disposition,
    pub delivery_tag: u64,
    pub message: String,
}

/// Broker failures outside of settling a delivery.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to receive delivery: {0}")]
    Receive(String),

    #[error("failed to subscribe to `{queue}`: {message}")]
    Subscribe { queue: String, message: String },

    #[error("failed to publish to `{queue}`: {message}")]
    Publish { queue: String, message: String },
}

/// Everything that can go wrong while processing one delivery.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Update(#[from] UpdateError),
}

impl ProcessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::Decode(_) => ErrorKind::Permanent,
            ProcessError::Update(_) => ErrorKind::Transient,
        }
    }

    /// How the delivery must be settled after this error.
    pub fn disposition(&self) -> Disposition {
        match self.kind() {
            ErrorKind::Permanent => Disposition::Drop,
            ErrorKind::Transient | ErrorKind::Infrastructure => Disposition::Requeue,
        }
    }
}

/// Which startup dependency could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Store,
    Broker,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Store => f.write_str("store"),
            Endpoint::Broker => f.write_str("broker"),
        }
    }
}

/// Store or broker unreachable at startup. Fatal to the process.
#[derive(Debug, Error)]
#[error("{endpoint} unreachable: {source}")]
pub struct ConnectivityError {
    pub endpoint: Endpoint,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl ConnectivityError {
    pub fn store(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            endpoint: Endpoint::Store,
            source: source.into(),
        }
    }

    pub fn broker(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            endpoint: Endpoint::Broker,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Infrastructure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_dropped_without_requeue() {
        let err: ProcessError = DecodeError::EmptyField { field: "choice" }.into();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert_eq!(err.disposition(), Disposition::Drop);
    }

    #[test]
    fn update_errors_are_requeued() {
        let err: ProcessError = UpdateError::new(
            Step::IncrementTally,
            StoreError::Unavailable("connection reset".into()),
        )
        .into();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.disposition(), Disposition::Requeue);
        assert_eq!(
            err.to_string(),
            "increment_tally failed: store unavailable: connection reset"
        );
    }

    #[test]
    fn connectivity_error_names_the_endpoint() {
        let err = ConnectivityError::broker("connection refused");
        assert_eq!(err.to_string(), "broker unreachable: connection refused");
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
