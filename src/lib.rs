// src/lib.rs
// Long-lived RabbitMQ consumers and publishers. Each runnable owns one
// connection and one dedicated thread and reconnects with exponential backoff
// whenever the broker goes away.

pub mod config;
pub mod rabbitmq;

pub use config::AmqpConfig;
pub use rabbitmq::{
    AmqpConsumer, AmqpPublisher, AmqpRunnableFactory, Delivery, RabbitMQError, Result,
};
