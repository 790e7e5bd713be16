//! AmqpDeliveryQueue - RabbitMQ 上の投票キュー

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info, warn};

use tally_core::domain::{AckError, BrokerError, ConnectivityError, Disposition};
use tally_core::ports::{DeliveryQueue, MessageLease, Subscription};

use crate::config::AmqpConfig;

/// Persistent messages survive a broker restart.
const PERSISTENT: u8 = 2;

/// Deliveries in flight per subscription.
const PREFETCH: u16 = 1;

/// Handle on one broker connection and the durable vote queue.
pub struct AmqpDeliveryQueue {
    connection: Connection,
    /// Used for publishing; every subscription opens its own channel.
    channel: Channel,
    queue: String,
}

impl AmqpDeliveryQueue {
    /// Connect and declare the queue.
    pub async fn connect(config: &AmqpConfig) -> Result<Self, ConnectivityError> {
        let connection = Connection::connect(&config.uri(), ConnectionProperties::default())
            .await
            .map_err(ConnectivityError::broker)?;

        let channel = match declare(&connection, &config.queue).await {
            Ok(channel) => channel,
            Err(e) => {
                // 接続は確立済みなので閉じてから返す
                if let Err(close_err) = connection.close(0, "queue declaration failed").await {
                    warn!(error = %close_err, "Failed to close broker connection after declare failure");
                }
                return Err(ConnectivityError::broker(e));
            }
        };

        info!(
            host = %config.host,
            port = config.port,
            queue = %config.queue,
            "Connected to RabbitMQ"
        );

        Ok(Self {
            connection,
            channel,
            queue: config.queue.clone(),
        })
    }

    /// Close the connection. Unacked deliveries go back to the queue.
    pub async fn close(&self) {
        if let Err(e) = self.connection.close(200, "worker shutdown").await {
            warn!(error = %e, "Failed to close broker connection cleanly");
        }
    }
}

async fn declare(connection: &Connection, queue: &str) -> Result<Channel, lapin::Error> {
    let channel = connection.create_channel().await?;
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(channel)
}

#[async_trait]
impl DeliveryQueue for AmqpDeliveryQueue {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn subscribe(&self, consumer_tag: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let subscribe_error = |e: lapin::Error| BrokerError::Subscribe {
            queue: self.queue.clone(),
            message: e.to_string(),
        };

        let channel = self.connection.create_channel().await.map_err(subscribe_error)?;
        channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await
            .map_err(subscribe_error)?;

        // no_ack = false: 手動 ack
        let consumer = channel
            .basic_consume(
                &self.queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_error)?;

        debug!(queue = %self.queue, consumer_tag, "Subscribed");
        Ok(Box::new(AmqpSubscription {
            _channel: channel,
            consumer,
        }))
    }

    async fn publish(&self, body: &[u8]) -> Result<(), BrokerError> {
        let publish_error = |e: lapin::Error| BrokerError::Publish {
            queue: self.queue.clone(),
            message: e.to_string(),
        };

        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;
        Ok(())
    }
}

struct AmqpSubscription {
    // consumer と同じ寿命で保持する
    _channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Result<Option<Box<dyn MessageLease>>, BrokerError> {
        match self.consumer.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(BrokerError::Receive(e.to_string())),
            Some(Ok(delivery)) => Ok(Some(Box::new(AmqpLease {
                delivery_tag: delivery.delivery_tag,
                redelivered: delivery.redelivered,
                body: delivery.data,
                acker: delivery.acker,
            }))),
        }
    }
}

struct AmqpLease {
    delivery_tag: u64,
    redelivered: bool,
    body: Vec<u8>,
    acker: Acker,
}

impl AmqpLease {
    fn ack_error(&self, action: Disposition, e: lapin::Error) -> AckError {
        AckError {
            action,
            delivery_tag: self.delivery_tag,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl MessageLease for AmqpLease {
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
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| self.ack_error(Disposition::Ack, e))
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), AckError> {
        let action = if requeue {
            Disposition::Requeue
        } else {
            Disposition::Drop
        };
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|e| self.ack_error(action, e))
    }
}
