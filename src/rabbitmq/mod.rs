// src/rabbitmq/mod.rs
// Supervised RabbitMQ consumers and publishers

// RabbitMQ-specific errors
pub mod errors;

pub mod amqp_client;
pub mod backoff;
pub mod broker;
pub mod callbacks;
pub mod connection;
pub mod consumer;
pub mod endpoint;
pub mod factory;
pub mod handoff;
pub mod publisher;
pub mod supervisor;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::LapinBroker;
pub use backoff::BackoffPolicy;
pub use broker::{Broker, BrokerChannel, BrokerConnection, DeclareFlags, Delivery, Subscription};
pub use callbacks::{JsonPublisherCallback, PublisherCallback, PublisherData, StringPublisherCallback};
pub use connection::{Link, RunState};
pub use consumer::{AmqpConsumer, ConsumerCallback};
pub use endpoint::{Endpoint, EndpointKind};
pub use errors::{RabbitMQError, Result};
pub use factory::AmqpRunnableFactory;
pub use handoff::HandoffQueue;
pub use publisher::AmqpPublisher;
pub use supervisor::{AmqpRunnable, Runnable, RunnerHandle, Supervisor, Tick};
