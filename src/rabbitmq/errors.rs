// src/rabbitmq/errors.rs

use serde_json::Error as SerdeError;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Debug, Error)]
pub enum RabbitMQError {
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("RabbitMQ declare error: {0}")]
    DeclareError(String),

    #[error("Message serialization error: {0}")]
    SerializationError(#[from] SerdeError),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("RabbitMQ consume error: {0}")]
    ConsumeError(String),

    #[error("RabbitMQ acknowledge error: {0}")]
    AckError(String),

    #[error("Callback failed: {0}")]
    CallbackError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Connection timeout: {0}")]
    TimeoutError(String),

    #[error("Runnable lock acquisition failed")]
    LockError,

    #[error("Runnable was already started")]
    AlreadyStarted,

    #[error("Could not spawn runnable thread: {0}")]
    SpawnError(#[from] std::io::Error),

    #[error("Interrupted")]
    Interrupted,
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

impl RabbitMQError {
    /// Interruption is the only failure that ends a runnable without a retry.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, RabbitMQError::Interrupted)
    }

    /// Serialization failures keep their type; anything else becomes a
    /// callback error carrying the full context chain.
    pub(crate) fn callback(error: anyhow::Error) -> Self {
        match error.downcast::<SerdeError>() {
            Ok(e) => RabbitMQError::SerializationError(e),
            Err(error) => RabbitMQError::CallbackError(format!("{:#}", error)),
        }
    }
}

impl From<Elapsed> for RabbitMQError {
    fn from(_: Elapsed) -> Self {
        RabbitMQError::TimeoutError("Operation timed out".to_string())
    }
}
