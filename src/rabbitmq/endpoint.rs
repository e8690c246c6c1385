// src/rabbitmq/endpoint.rs

use std::fmt;

use super::broker::{BrokerChannel, DeclareFlags};
use super::errors::Result;
use crate::config::AmqpConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Queue,
    Exchange,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Queue => write!(f, "queue"),
            EndpointKind::Exchange => write!(f, "exchange"),
        }
    }
}

/// The named queue or exchange a runnable is attached to, together with how
/// it gets declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    kind: EndpointKind,
    exchange_type: String,
    declaring: bool,
    flags: DeclareFlags,
}

impl Endpoint {
    pub fn queue(name: &str, config: &AmqpConfig) -> Self {
        Self::new(name, EndpointKind::Queue, config)
    }

    pub fn exchange(name: &str, config: &AmqpConfig) -> Self {
        Self::new(name, EndpointKind::Exchange, config)
    }

    fn new(name: &str, kind: EndpointKind, config: &AmqpConfig) -> Self {
        Self {
            name: name.to_string(),
            kind,
            exchange_type: config.exchange_type.clone(),
            declaring: config.declaring,
            flags: DeclareFlags {
                durable: config.durable,
                exclusive: config.exclusive,
                auto_delete: config.auto_delete,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// `(exchange, routing_key)` a publisher sends to.
    ///
    /// A queue is a routing key on the default exchange; an exchange gets an
    /// empty routing key and does its own fan-out.
    pub fn publish_address(&self) -> (&str, &str) {
        match self.kind {
            EndpointKind::Queue => ("", &self.name),
            EndpointKind::Exchange => (&self.name, ""),
        }
    }

    /// Declares the endpoint itself, if declaring is turned on.
    pub async fn declare<C: BrokerChannel>(&self, channel: &C) -> Result<()> {
        if !self.declaring {
            return Ok(());
        }

        match self.kind {
            EndpointKind::Queue => {
                channel.declare_queue(&self.name, self.flags).await?;
            }
            EndpointKind::Exchange => {
                channel
                    .declare_exchange(&self.name, &self.exchange_type, self.flags)
                    .await?;
            }
        }
        Ok(())
    }

    /// Returns the queue a consumer should subscribe to.
    ///
    /// For an exchange this is a fresh server-named queue bound with an empty
    /// routing key.
    pub async fn listen_queue<C: BrokerChannel>(&self, channel: &C) -> Result<String> {
        self.declare(channel).await?;

        match self.kind {
            EndpointKind::Queue => Ok(self.name.clone()),
            EndpointKind::Exchange => {
                let queue = channel
                    .declare_queue("", DeclareFlags::private_queue())
                    .await?;
                channel.bind_queue(&queue, &self.name, "").await?;
                Ok(queue)
            }
        }
    }
}
