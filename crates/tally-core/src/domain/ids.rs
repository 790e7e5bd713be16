//! Domain keys (strongly-typed string keys).
//!
//! Job IDs and choice labels are both opaque strings on the wire and in the
//! store. `Key<T>` gives them one shared implementation while keeping them
//! distinct types: a `JobId` can never be passed where a `Choice` is expected.
//!
//! ## Phantom Type パターン
//! `T` は実行時には使わないマーカー型（PhantomData）で、
//! コンパイル時の型安全性だけを提供します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

use super::errors::DecodeError;

/// KeyMarker は各キー型のマーカー trait
///
/// `field()` はメッセージ上のフィールド名（エラーメッセージとログで使用）。
pub trait KeyMarker: Send + Sync + 'static {
    fn field() -> &'static str;
}

/// ジェネリックなキー型
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key<T: KeyMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: KeyMarker> Key<T> {
    /// Wrap a value without validation (adapters reading back from the store, tests).
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// Validate a value taken from an inbound payload.
    ///
    /// Blank values are rejected: a job or choice keyed by "" can never be
    /// processed meaningfully, so the message is treated as malformed.
    pub fn parse(value: String) -> Result<Self, DecodeError> {
        if value.trim().is_empty() {
            return Err(DecodeError::EmptyField { field: T::field() });
        }
        Ok(Self::new(value))
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_inner(self) -> String {
        self.value
    }
}

impl<T: KeyMarker> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: KeyMarker> AsRef<str> for Key<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Job のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl KeyMarker for Job {
    fn field() -> &'static str {
        "job_id"
    }
}

/// Choice のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChoiceLabel {}

impl KeyMarker for ChoiceLabel {
    fn field() -> &'static str {
        "choice"
    }
}

/// Identifier of a Job row (`jobs.id`).
pub type JobId = Key<Job>;

/// A vote choice label (`votes.choice`).
pub type Choice = Key<ChoiceLabel>;

impl JobId {
    /// Fresh, time-sortable job id for producers.
    pub fn generate() -> Self {
        Self::new(Ulid::new().to_string())
    }
}
