// src/rabbitmq/consumer.rs
// Pull one delivery per tick, hand it to the callback, then acknowledge it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{trace, warn};

use super::broker::{Broker, BrokerChannel, Delivery, Subscription};
use super::connection::{bounded, Link, CLEANUP_TIMEOUT};
use super::endpoint::{Endpoint, EndpointKind};
use super::errors::{RabbitMQError, Result};
use super::supervisor::{AmqpRunnable, Runnable, Supervisor, Tick};
use crate::config::AmqpConfig;

/// Receives every delivery of a consumer.
///
/// The return value decides whether the consumer keeps running. The delivery
/// is acknowledged after this returns, whatever the outcome.
pub trait ConsumerCallback: Send + 'static {
    fn with_delivery(&mut self, delivery: &Delivery) -> anyhow::Result<bool>;
}

impl<F> ConsumerCallback for F
where
    F: FnMut(&Delivery) -> anyhow::Result<bool> + Send + 'static,
{
    fn with_delivery(&mut self, delivery: &Delivery) -> anyhow::Result<bool> {
        self(delivery)
    }
}

pub struct ConsumerWorker<B: Broker> {
    endpoint: Endpoint,
    prefetch_count: u16,
    tick_timeout: Duration,
    callback: Box<dyn ConsumerCallback>,
    subscription: Option<<B::Channel as BrokerChannel>::Subscription>,
}

impl<B: Broker> ConsumerWorker<B> {
    pub fn new(endpoint: Endpoint, config: &AmqpConfig, callback: Box<dyn ConsumerCallback>) -> Self {
        Self {
            endpoint,
            prefetch_count: config.prefetch_count,
            tick_timeout: config.tick_timeout(),
            callback,
            subscription: None,
        }
    }

    /// Runs the callback, turning errors and panics into a callback error.
    fn dispatch(&mut self, delivery: &Delivery) -> Result<Tick> {
        let callback = &mut self.callback;
        match panic::catch_unwind(AssertUnwindSafe(|| callback.with_delivery(delivery))) {
            Ok(Ok(true)) => Ok(Tick::Continue),
            Ok(Ok(false)) => Ok(Tick::Stop),
            Ok(Err(e)) => Err(RabbitMQError::callback(e)),
            Err(_) => Err(RabbitMQError::CallbackError(format!(
                "consumer callback panicked on delivery {}",
                delivery.delivery_tag
            ))),
        }
    }
}

#[async_trait]
impl<B: Broker> Runnable<B> for ConsumerWorker<B> {
    fn service_type(&self) -> &'static str {
        match self.endpoint.kind() {
            EndpointKind::Queue => "queue-consumer",
            EndpointKind::Exchange => "exchange-consumer",
        }
    }

    async fn connect_callback(&mut self, _name: &str, channel: &B::Channel) -> Result<()> {
        if self.prefetch_count > 0 {
            channel.qos(self.prefetch_count).await?;
        }

        let queue = self.endpoint.listen_queue(channel).await?;
        self.subscription = Some(channel.subscribe(&queue).await?);
        Ok(())
    }

    async fn disconnect_callback(&mut self, channel: &B::Channel) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };

        let consumer_tag = subscription.consumer_tag();
        if let Err(e) = bounded(CLEANUP_TIMEOUT, channel.cancel(consumer_tag)).await {
            warn!(error = %e, "While cancelling subscription for {}", consumer_tag);
        }
    }

    async fn process(&mut self, link: &mut Link<B>) -> Result<Tick> {
        let state = link.state();
        let channel = link.channel_connect(self).await?;

        let Some(subscription) = self.subscription.as_mut() else {
            // Possible right after a reconnect; treat it as an idle tick.
            warn!(name = %self.endpoint.name(), "Channel not connected!");
            state.sleep(self.tick_timeout).await?;
            return Ok(Tick::Continue);
        };

        let delivery = match state.wait(self.tick_timeout, subscription.next_delivery()).await? {
            None => {
                trace!("Tick...");
                return Ok(Tick::Continue);
            }
            Some(next) => next?.ok_or_else(|| {
                RabbitMQError::ConsumeError("subscription was cancelled by the broker".to_string())
            })?,
        };

        let outcome = self.dispatch(&delivery);
        channel.ack(delivery.delivery_tag).await?;
        outcome
    }
}

/// A queue or exchange listener.
pub struct AmqpConsumer<B: Broker> {
    runnable: AmqpRunnable<B, ConsumerWorker<B>>,
}

impl<B: Broker> AmqpConsumer<B> {
    pub fn new<C>(broker: Arc<B>, config: &AmqpConfig, endpoint: Endpoint, callback: C) -> Self
    where
        C: ConsumerCallback,
    {
        let name = endpoint.name().to_string();
        let worker = ConsumerWorker::new(endpoint, config, Box::new(callback));
        Self {
            runnable: AmqpRunnable::new(Supervisor::new(broker, config, &name, worker)),
        }
    }
}

impl<B: Broker> std::ops::Deref for AmqpConsumer<B> {
    type Target = AmqpRunnable<B, ConsumerWorker<B>>;

    fn deref(&self) -> &Self::Target {
        &self.runnable
    }
}
