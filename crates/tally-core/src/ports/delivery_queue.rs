//! DeliveryQueue port - 配送キュー（RabbitMQ または InMemory）
//!
//! 実装:
//! - `tally-amqp`: AmqpDeliveryQueue（本番用）
//! - `impls::InMemoryDeliveryQueue`（開発・テスト用）

use async_trait::async_trait;

use crate::domain::{AckError, BrokerError};

/// One delivery handed to a worker.
/// The worker owns this lease and must either `ack` or `reject` it.
///
/// Settling consumes the lease, so a delivery can be settled at most once.
#[async_trait]
pub trait MessageLease: Send + Sync {
    fn body(&self) -> &[u8];

    /// Broker-assigned tag, unique per subscription.
    fn delivery_tag(&self) -> u64;

    /// Has the broker delivered this message before?
    fn redelivered(&self) -> bool;

    /// Fully handled; the broker drops the message.
    async fn ack(self: Box<Self>) -> Result<(), AckError>;

    /// Handling failed. With `requeue` the broker redelivers later;
    /// without it the message is discarded (or dead-lettered by broker policy).
    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), AckError>;
}

/// A consumer on the vote queue. One subscription feeds exactly one worker
/// loop and never has more than one unsettled delivery in flight.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery.
    ///
    /// `Ok(None)` means the broker ended the subscription. Must be cancel-safe:
    /// the worker races it against shutdown.
    async fn next_delivery(&mut self) -> Result<Option<Box<dyn MessageLease>>, BrokerError>;
}

/// The vote queue itself.
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Name of the queue this handle consumes from and publishes to.
    fn queue_name(&self) -> &str;

    /// Open a manual-ack subscription.
    async fn subscribe(&self, consumer_tag: &str) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Publish a persistent message.
    async fn publish(&self, body: &[u8]) -> Result<(), BrokerError>;
}
