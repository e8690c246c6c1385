// src/rabbitmq/amqp_client.rs
// lapin-backed implementation of the broker traits.

use async_trait::async_trait;
use futures_lite::StreamExt;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Consumer, ExchangeKind,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::broker::{Broker, BrokerChannel, BrokerConnection, DeclareFlags, Delivery, Subscription};
use super::errors::{RabbitMQError, Result};
use crate::config::AmqpConfig;

/// Opens lapin connections to a fixed AMQP URI.
#[derive(Debug, Clone)]
pub struct LapinBroker {
    uri: String,
}

impl LapinBroker {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
        }
    }

    pub fn from_config(config: &AmqpConfig) -> Result<Self> {
        config
            .connection_url
            .as_deref()
            .map(Self::new)
            .ok_or_else(|| {
                RabbitMQError::ConfigurationError("connection_url is not set".to_string())
            })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl Broker for LapinBroker {
    type Connection = LapinConnection;
    type Channel = LapinChannel;

    async fn open_connection(&self) -> Result<LapinConnection> {
        debug!("Attempting to connect to RabbitMQ at {}", self.uri);

        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| RabbitMQError::ConnectionError(format!("Failed to connect: {}", e)))?;

        info!("Successfully connected to RabbitMQ");
        Ok(LapinConnection(connection))
    }
}

pub struct LapinConnection(Connection);

#[async_trait]
impl BrokerConnection for LapinConnection {
    type Channel = LapinChannel;

    async fn open_channel(&self) -> Result<LapinChannel> {
        let channel = self
            .0
            .create_channel()
            .await
            .map_err(|e| RabbitMQError::ChannelError(format!("Failed to create channel: {}", e)))?;
        Ok(LapinChannel(channel))
    }

    fn is_open(&self) -> bool {
        self.0.status().connected()
    }

    async fn close(&self) -> Result<()> {
        self.0
            .close(0, "Closing connection")
            .await
            .map_err(|e| RabbitMQError::ConnectionError(e.to_string()))
    }
}

pub struct LapinChannel(Channel);

/// Maps the configured exchange type onto lapin's exchange kinds.
pub fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind.to_ascii_lowercase().as_str() {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "topic" => ExchangeKind::Topic,
        "headers" => ExchangeKind::Headers,
        _ => ExchangeKind::Custom(kind.to_string()),
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    type Subscription = LapinSubscription;

    async fn qos(&self, prefetch_count: u16) -> Result<()> {
        debug!("Setting channel QoS to {}", prefetch_count);
        self.0
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| RabbitMQError::ChannelError(format!("Failed to set QoS: {}", e)))
    }

    async fn declare_queue(&self, name: &str, flags: DeclareFlags) -> Result<String> {
        let queue = self
            .0
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: flags.durable,
                    exclusive: flags.exclusive,
                    auto_delete: flags.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                RabbitMQError::DeclareError(format!("Failed to declare queue '{}': {}", name, e))
            })?;

        debug!(
            "Queue '{}' declared with {} messages",
            queue.name().as_str(),
            queue.message_count()
        );
        Ok(queue.name().as_str().to_string())
    }

    async fn declare_exchange(&self, name: &str, kind: &str, flags: DeclareFlags) -> Result<()> {
        self.0
            .exchange_declare(
                name,
                exchange_kind(kind),
                ExchangeDeclareOptions {
                    durable: flags.durable,
                    auto_delete: flags.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                RabbitMQError::DeclareError(format!("Failed to declare exchange '{}': {}", name, e))
            })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.0
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RabbitMQError::DeclareError(format!("Failed to bind queue: {}", e)))
    }

    async fn subscribe(&self, queue: &str) -> Result<LapinSubscription> {
        let consumer_tag = format!("consumer-{}", Uuid::new_v4());
        let consumer = self
            .0
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RabbitMQError::ConsumeError(e.to_string()))?;

        debug!("Started consuming from queue: {}", queue);
        Ok(LapinSubscription {
            consumer_tag,
            consumer,
        })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.0
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| RabbitMQError::ConsumeError(e.to_string()))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.0
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| RabbitMQError::AckError(e.to_string()))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: BasicProperties,
        payload: &[u8],
    ) -> Result<()> {
        self.0
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| RabbitMQError::PublishError(e.to_string()))?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.0.status().connected()
    }

    async fn close(&self) -> Result<()> {
        self.0
            .close(0, "Closing channel")
            .await
            .map_err(|e| RabbitMQError::ChannelError(e.to_string()))
    }
}

pub struct LapinSubscription {
    consumer_tag: String,
    consumer: Consumer,
}

#[async_trait]
impl Subscription for LapinSubscription {
    fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Delivery {
                delivery_tag: delivery.delivery_tag,
                exchange: delivery.exchange.as_str().to_string(),
                routing_key: delivery.routing_key.as_str().to_string(),
                redelivered: delivery.redelivered,
                properties: delivery.properties,
                data: delivery.data,
            })),
            Some(Err(e)) => Err(RabbitMQError::ConsumeError(e.to_string())),
            None => Ok(None),
        }
    }
}
