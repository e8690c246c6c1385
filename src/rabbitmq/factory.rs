// src/rabbitmq/factory.rs

use std::sync::Arc;

use serde::Serialize;

use super::amqp_client::LapinBroker;
use super::broker::Broker;
use super::callbacks::{JsonPublisherCallback, PublisherCallback, StringPublisherCallback};
use super::consumer::{AmqpConsumer, ConsumerCallback};
use super::endpoint::Endpoint;
use super::errors::Result;
use super::publisher::AmqpPublisher;
use crate::config::AmqpConfig;

/// Builds consumers and publishers that share one broker and configuration.
pub struct AmqpRunnableFactory<B: Broker> {
    broker: Arc<B>,
    config: AmqpConfig,
}

impl AmqpRunnableFactory<LapinBroker> {
    /// A lapin-backed factory connecting to `config.connection_url`.
    pub fn from_config(config: AmqpConfig) -> Result<Self> {
        config.validate()?;
        let broker = LapinBroker::from_config(&config)?;
        Ok(Self::new(broker, config))
    }
}

impl<B: Broker> AmqpRunnableFactory<B> {
    pub fn new(broker: B, config: AmqpConfig) -> Self {
        Self {
            broker: Arc::new(broker),
            config,
        }
    }

    pub fn config(&self) -> &AmqpConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Listens on the named queue; the callback sees every delivery.
    pub fn create_queue_listener<C: ConsumerCallback>(&self, name: &str, callback: C) -> AmqpConsumer<B> {
        let endpoint = Endpoint::queue(name, &self.config);
        AmqpConsumer::new(Arc::clone(&self.broker), &self.config, endpoint, callback)
    }

    /// Listens on the named exchange through a private, server-named queue.
    pub fn create_exchange_listener<C: ConsumerCallback>(&self, name: &str, callback: C) -> AmqpConsumer<B> {
        let endpoint = Endpoint::exchange(name, &self.config);
        AmqpConsumer::new(Arc::clone(&self.broker), &self.config, endpoint, callback)
    }

    pub fn create_queue_publisher<T, C>(&self, name: &str, callback: C) -> AmqpPublisher<T, B>
    where
        T: Send + 'static,
        C: PublisherCallback<T>,
    {
        let endpoint = Endpoint::queue(name, &self.config);
        AmqpPublisher::new(Arc::clone(&self.broker), &self.config, endpoint, callback)
    }

    pub fn create_exchange_publisher<T, C>(&self, name: &str, callback: C) -> AmqpPublisher<T, B>
    where
        T: Send + 'static,
        C: PublisherCallback<T>,
    {
        let endpoint = Endpoint::exchange(name, &self.config);
        AmqpPublisher::new(Arc::clone(&self.broker), &self.config, endpoint, callback)
    }

    /// Publishes items to a queue as JSON.
    pub fn create_queue_json_publisher<T>(&self, name: &str) -> AmqpPublisher<T, B>
    where
        T: Serialize + Send + 'static,
    {
        self.create_queue_publisher(name, JsonPublisherCallback::<T>::default())
    }

    /// Publishes items to an exchange as JSON.
    pub fn create_exchange_json_publisher<T>(&self, name: &str) -> AmqpPublisher<T, B>
    where
        T: Serialize + Send + 'static,
    {
        self.create_exchange_publisher(name, JsonPublisherCallback::<T>::default())
    }

    pub fn create_queue_text_publisher(&self, name: &str) -> AmqpPublisher<String, B> {
        self.create_queue_publisher(name, StringPublisherCallback::default())
    }

    pub fn create_exchange_text_publisher(&self, name: &str) -> AmqpPublisher<String, B> {
        self.create_exchange_publisher(name, StringPublisherCallback::default())
    }
}
