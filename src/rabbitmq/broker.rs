// src/rabbitmq/broker.rs
// The broker client as seen by the runnables. `amqp_client` implements it on
// top of lapin; tests plug in an in-memory broker.

use async_trait::async_trait;
use lapin::BasicProperties;

use super::errors::Result;

/// Flags used when declaring a queue or an exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclareFlags {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl DeclareFlags {
    /// What a server-named, private listener queue is declared with.
    pub fn private_queue() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// A message handed from the broker to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
}

impl Delivery {
    /// Payload as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Connection: BrokerConnection<Channel = Self::Channel>;
    type Channel: BrokerChannel;

    async fn open_connection(&self) -> Result<Self::Connection>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    async fn open_channel(&self) -> Result<Self::Channel>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    type Subscription: Subscription;

    async fn qos(&self, prefetch_count: u16) -> Result<()>;

    /// Declares `name` and returns the queue name the broker settled on.
    /// An empty name asks the broker for a server-named queue.
    async fn declare_queue(&self, name: &str, flags: DeclareFlags) -> Result<String>;

    async fn declare_exchange(&self, name: &str, kind: &str, flags: DeclareFlags) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    async fn subscribe(&self, queue: &str) -> Result<Self::Subscription>;

    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: BasicProperties,
        payload: &[u8],
    ) -> Result<()>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Subscription: Send + 'static {
    fn consumer_tag(&self) -> &str;

    /// Waits for the next delivery. `None` means the broker ended the subscription.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>>;
}
