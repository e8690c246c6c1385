// src/rabbitmq/callbacks.rs
// Turning queued items into AMQP messages.

use std::marker::PhantomData;

use lapin::BasicProperties;
use serde::Serialize;

/// A message ready to go out, plus whether the connection should be kept
/// after sending it.
#[derive(Debug, Clone)]
pub struct PublisherData {
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    healthy: bool,
}

impl PublisherData {
    pub fn new(properties: BasicProperties, data: Vec<u8>) -> Self {
        Self {
            properties,
            data,
            healthy: true,
        }
    }

    /// Marks the message so the publisher stops after sending it.
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

/// Converts every queued item into a message. `None` means there is nothing
/// to send for this item.
pub trait PublisherCallback<T>: Send + 'static {
    fn publish(&mut self, item: &T) -> anyhow::Result<Option<PublisherData>>;
}

impl<T, F> PublisherCallback<T> for F
where
    F: FnMut(&T) -> anyhow::Result<Option<PublisherData>> + Send + 'static,
{
    fn publish(&mut self, item: &T) -> anyhow::Result<Option<PublisherData>> {
        self(item)
    }
}

fn transient_properties(content_type: &str) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(content_type.into())
        .with_delivery_mode(1)
        .with_priority(0)
}

/// Sends strings as `text/plain`.
#[derive(Debug, Clone)]
pub struct StringPublisherCallback {
    properties: BasicProperties,
}

impl Default for StringPublisherCallback {
    fn default() -> Self {
        Self {
            properties: transient_properties("text/plain"),
        }
    }
}

impl PublisherCallback<String> for StringPublisherCallback {
    fn publish(&mut self, item: &String) -> anyhow::Result<Option<PublisherData>> {
        Ok(Some(PublisherData::new(
            self.properties.clone(),
            item.as_bytes().to_vec(),
        )))
    }
}

/// Serializes items as `application/json`.
#[derive(Debug)]
pub struct JsonPublisherCallback<T> {
    properties: BasicProperties,
    _item: PhantomData<fn(&T)>,
}

impl<T> Default for JsonPublisherCallback<T> {
    fn default() -> Self {
        Self {
            properties: transient_properties("application/json"),
            _item: PhantomData,
        }
    }
}

impl<T> PublisherCallback<T> for JsonPublisherCallback<T>
where
    T: Serialize + 'static,
{
    fn publish(&mut self, item: &T) -> anyhow::Result<Option<PublisherData>> {
        let payload = serde_json::to_vec(item)?;
        let properties = self
            .properties
            .clone()
            .with_timestamp(chrono::Utc::now().timestamp() as u64);
        Ok(Some(PublisherData::new(properties, payload)))
    }
}
