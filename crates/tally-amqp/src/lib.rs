//! tally-amqp
//!
//! RabbitMQ implementation of the `DeliveryQueue` port (AMQP 0-9-1 via lapin).
//!
//! - キューは durable（exclusive / auto-delete ではない）
//! - subscription ごとに専用 channel、prefetch = 1、手動 ack
//! - reject は `basic.nack`（multiple = false）

mod config;
mod queue;

pub use self::config::AmqpConfig;
pub use self::queue::AmqpDeliveryQueue;
