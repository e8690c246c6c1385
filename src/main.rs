use std::env;
use std::error::Error;
use std::time::Duration;

use amqp_runnables::config::{load_config, AmqpConfig};
use amqp_runnables::{AmqpRunnableFactory, Delivery};
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_QUEUE: &str = "amqp-runnables-demo";

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenv().ok();

    let mut config = load_config().unwrap_or_else(|e| {
        info!("No config file, falling back to the environment ({})", e);
        AmqpConfig::default()
    });
    if let Ok(uri) = env::var("RABBITMQ_URI") {
        config = config.with_connection_url(uri);
    }

    let factory = AmqpRunnableFactory::from_config(config)?;

    let consumer = factory.create_queue_listener(DEMO_QUEUE, |delivery: &Delivery| -> anyhow::Result<bool> {
        info!(tag = delivery.delivery_tag, "Received: {}", delivery.text());
        Ok(true)
    });
    let publisher = factory.create_queue_text_publisher(DEMO_QUEUE);

    let consumer_handle = consumer.start()?;
    let publisher_handle = publisher.start()?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut counter = 0u64;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => {
                    counter += 1;
                    if !publisher.offer_with_timeout(format!("Message {} from the demo publisher", counter)) {
                        warn!(counter, "Publisher queue is full, dropping message");
                    }
                }
            }
        }
    });

    info!("Shutting down");
    consumer.shutdown();
    consumer.interrupt();
    publisher.shutdown();
    publisher.interrupt();

    consumer_handle.join()?;
    publisher_handle.join()?;
    Ok(())
}
