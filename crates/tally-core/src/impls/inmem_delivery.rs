//! InMemoryDeliveryQueue - 開発用の配送キュー
//!
//! Behaves like a single durable AMQP queue with manual acknowledgment:
//! - a delivery stays "unacked" until its lease is settled
//! - reject with requeue puts it back with `redelivered = true`
//! - [`InMemoryDeliveryQueue::recover`] requeues every unacked delivery, like
//!   the broker does when a consumer's channel dies
//!
//! # 学習ポイント
//! - `Notify` + `enable()` による取りこぼしのない待機
//! - ロックを跨いで await しない

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::domain::{AckError, BrokerError, Disposition};
use crate::ports::{DeliveryQueue, MessageLease, Subscription};

/// A message waiting in the queue.
#[derive(Debug, Clone)]
struct Pending {
    body: Vec<u8>,
    redelivered: bool,
}

/// How one delivery was settled (for assertions in tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub disposition: Disposition,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Pending>,
    unacked: HashMap<u64, Pending>,
    settlements: Vec<Settlement>,
    next_tag: u64,

    /// No new deliveries once the ready queue drains.
    closed: bool,

    /// Remaining settle calls (ack or reject) that fail.
    failing_settles: usize,
}

impl QueueState {
    fn take_ready(&mut self) -> Option<(u64, Pending)> {
        let pending = self.ready.pop_front()?;
        self.next_tag += 1;
        let tag = self.next_tag;
        self.unacked.insert(tag, pending.clone());
        Some((tag, pending))
    }
}

/// InMemoryDeliveryQueue は開発・テスト用の配送キュー
pub struct InMemoryDeliveryQueue {
    name: String,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl InMemoryDeliveryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Stop handing out deliveries once the ready queue is empty.
    /// Subscriptions then return `Ok(None)`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Requeue all unacked deliveries (connection loss / consumer crash).
    pub async fn recover(&self) {
        {
            let mut state = self.state.lock().await;
            let mut unacked: Vec<(u64, Pending)> = state.unacked.drain().collect();
            unacked.sort_by_key(|(tag, _)| *tag);
            // 元の順序のまま先頭へ戻す
            for (_, mut pending) in unacked.into_iter().rev() {
                pending.redelivered = true;
                state.ready.push_front(pending);
            }
        }
        self.notify.notify_waiters();
    }

    /// Make the next `times` ack/reject calls fail. The delivery stays unacked.
    pub async fn fail_next_settles(&self, times: usize) {
        self.state.lock().await.failing_settles += times;
    }

    pub async fn settlements(&self) -> Vec<Settlement> {
        self.state.lock().await.settlements.clone()
    }

    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn unacked_len(&self) -> usize {
        self.state.lock().await.unacked.len()
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, _consumer_tag: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        Ok(Box::new(InMemorySubscription {
            state: Arc::clone(&self.state),
            notify: Arc::clone(&self.notify),
        }))
    }

    async fn publish(&self, body: &[u8]) -> Result<(), BrokerError> {
        self.state.lock().await.ready.push_back(Pending {
            body: body.to_vec(),
            redelivered: false,
        });
        self.notify.notify_waiters();
        Ok(())
    }
}

struct InMemorySubscription {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_delivery(&mut self) -> Result<Option<Box<dyn MessageLease>>, BrokerError> {
        loop {
            // 状態を確認する前に待機を登録しておく（notify_waiters の取りこぼし防止）
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some((delivery_tag, pending)) = state.take_ready() {
                    return Ok(Some(Box::new(InMemoryLease {
                        delivery_tag,
                        body: pending.body,
                        redelivered: pending.redelivered,
                        state: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                    })));
                }
                if state.closed {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }
}

/// Lease implementation for InMemoryDeliveryQueue.
struct InMemoryLease {
    delivery_tag: u64,
    body: Vec<u8>,
    redelivered: bool,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl InMemoryLease {
    async fn settle(self: Box<Self>, disposition: Disposition) -> Result<(), AckError> {
        let requeued = {
            let mut state = self.state.lock().await;
            if state.failing_settles > 0 {
                state.failing_settles -= 1;
                return Err(AckError {
                    action: disposition,
                    delivery_tag: self.delivery_tag,
                    message: "injected settle failure".into(),
                });
            }

            let Some(mut pending) = state.unacked.remove(&self.delivery_tag) else {
                return Err(AckError {
                    action: disposition,
                    delivery_tag: self.delivery_tag,
                    message: "unknown delivery tag".into(),
                });
            };

            state.settlements.push(Settlement {
                delivery_tag: self.delivery_tag,
                body: self.body.clone(),
                disposition,
            });

            if disposition == Disposition::Requeue {
                pending.redelivered = true;
                state.ready.push_back(pending);
                true
            } else {
                false
            }
        }; // Lock released here

        if requeued {
            self.notify.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl MessageLease for InMemoryLease {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(self: Box<Self>) -> Result<(), AckError> {
        self.settle(Disposition::Ack).await
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), AckError> {
        let disposition = if requeue {
            Disposition::Requeue
        } else {
            Disposition::Drop
        };
        self.settle(disposition).await
    }
}
