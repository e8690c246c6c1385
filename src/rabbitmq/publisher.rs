// src/rabbitmq/publisher.rs
// Drain the hand-off queue one item per tick and transmit it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::broker::{Broker, BrokerChannel};
use super::callbacks::{PublisherCallback, PublisherData};
use super::connection::Link;
use super::endpoint::{Endpoint, EndpointKind};
use super::errors::{RabbitMQError, Result};
use super::handoff::HandoffQueue;
use super::supervisor::{AmqpRunnable, Runnable, Supervisor, Tick};
use crate::config::AmqpConfig;

pub struct PublisherWorker<T> {
    endpoint: Endpoint,
    lazy_connect: bool,
    tick_timeout: Duration,
    queue: HandoffQueue<T>,
    callback: Box<dyn PublisherCallback<T>>,
}

impl<T: Send + 'static> PublisherWorker<T> {
    pub fn new(
        endpoint: Endpoint,
        config: &AmqpConfig,
        queue: HandoffQueue<T>,
        callback: Box<dyn PublisherCallback<T>>,
    ) -> Self {
        Self {
            endpoint,
            lazy_connect: config.lazy_transmitter_connect,
            tick_timeout: config.tick_timeout(),
            queue,
            callback,
        }
    }

    fn encode(&mut self, item: &T) -> Result<Option<PublisherData>> {
        let callback = &mut self.callback;
        match panic::catch_unwind(AssertUnwindSafe(|| callback.publish(item))) {
            Ok(outcome) => outcome.map_err(RabbitMQError::callback),
            Err(_) => Err(RabbitMQError::CallbackError(
                "publisher callback panicked".to_string(),
            )),
        }
    }
}

#[async_trait]
impl<B: Broker, T: Send + 'static> Runnable<B> for PublisherWorker<T> {
    fn service_type(&self) -> &'static str {
        match self.endpoint.kind() {
            EndpointKind::Queue => "queue-publisher",
            EndpointKind::Exchange => "exchange-publisher",
        }
    }

    async fn connect_callback(&mut self, _name: &str, channel: &B::Channel) -> Result<()> {
        self.endpoint.declare(channel).await
    }

    async fn process(&mut self, link: &mut Link<B>) -> Result<Tick> {
        let state = link.state();

        if !self.lazy_connect {
            link.channel_connect(self).await?;
        }

        let Some(item) = state.wait(self.tick_timeout, self.queue.take()).await?.flatten() else {
            trace!("Tick...");
            return Ok(Tick::Continue);
        };

        let Some(message) = self.encode(&item)? else {
            return Ok(Tick::Continue);
        };

        let healthy = message.is_healthy();
        let channel = link.channel_connect(self).await?;
        let (exchange, routing_key) = self.endpoint.publish_address();
        channel
            .publish(exchange, routing_key, message.properties, &message.data)
            .await?;

        if channel.is_open() && healthy {
            Ok(Tick::Continue)
        } else {
            debug!(
                name = %self.endpoint.name(),
                channel_open = channel.is_open(),
                healthy,
                "Stopping publisher after send"
            );
            Ok(Tick::Stop)
        }
    }
}

/// A queue or exchange publisher fed through a bounded in-memory queue.
///
/// Any thread may enqueue; the publisher's own thread drains and transmits.
pub struct AmqpPublisher<T: Send + 'static, B: Broker> {
    queue: HandoffQueue<T>,
    transmit_timeout: Duration,
    runnable: AmqpRunnable<B, PublisherWorker<T>>,
}

impl<T: Send + 'static, B: Broker> AmqpPublisher<T, B> {
    pub fn new<C>(broker: Arc<B>, config: &AmqpConfig, endpoint: Endpoint, callback: C) -> Self
    where
        C: PublisherCallback<T>,
    {
        let queue = HandoffQueue::new(config.publisher_queue_length);
        let name = endpoint.name().to_string();
        let worker = PublisherWorker::new(endpoint, config, queue.clone(), Box::new(callback));

        Self {
            queue,
            transmit_timeout: config.transmit_timeout(),
            runnable: AmqpRunnable::new(Supervisor::new(broker, config, &name, worker)),
        }
    }

    /// Enqueues without waiting; `false` when the queue is full.
    pub fn offer(&self, item: T) -> bool {
        self.queue.offer(item)
    }

    /// Waits up to the configured transmit timeout for room.
    pub fn offer_with_timeout(&self, item: T) -> bool {
        self.queue.offer_timeout(item, self.transmit_timeout)
    }

    pub fn offer_timeout(&self, item: T, timeout: Duration) -> bool {
        self.queue.offer_timeout(item, timeout)
    }

    /// Blocks until there is room. Gives up (returning `false`) when the
    /// publisher gets interrupted.
    pub fn put(&self, item: T) -> bool {
        self.queue.put(item, self.runnable.run_state().interrupt_token())
    }

    /// Like [`AmqpPublisher::put`], but also gives up when `cancel` fires.
    pub fn put_until(&self, item: T, cancel: &CancellationToken) -> bool {
        let interrupt = self.runnable.run_state().interrupt_token();
        if interrupt.is_cancelled() || cancel.is_cancelled() {
            return false;
        }

        futures::executor::block_on(async {
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => false,
                _ = cancel.cancelled() => false,
                sent = self.queue.insert(item) => sent,
            }
        })
    }

    pub fn remaining_capacity(&self) -> usize {
        self.queue.remaining_capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<T: Send + 'static, B: Broker> std::ops::Deref for AmqpPublisher<T, B> {
    type Target = AmqpRunnable<B, PublisherWorker<T>>;

    fn deref(&self) -> &Self::Target {
        &self.runnable
    }
}
