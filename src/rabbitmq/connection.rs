// src/rabbitmq/connection.rs
// Connection/channel ownership for a single runnable.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broker::{Broker, BrokerChannel, BrokerConnection};
use super::errors::{RabbitMQError, Result};
use super::supervisor::Runnable;

/// Upper bound for a single best-effort close or cancel.
pub(crate) const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Flags shared between a runnable's own thread and the threads observing it.
#[derive(Debug)]
pub struct RunState {
    running: AtomicBool,
    connected: AtomicBool,
    interrupt: CancellationToken,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            interrupt: CancellationToken::new(),
        }
    }
}

impl RunState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clears the run flag; the loop notices at the top of its next tick.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Wakes every suspension point of the runnable and makes it stop.
    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    pub fn interrupt_token(&self) -> &CancellationToken {
        &self.interrupt
    }

    /// Sleeps for `duration` unless interrupted first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => Err(RabbitMQError::Interrupted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Waits up to `timeout` for `future`. `Ok(None)` is a plain timeout.
    pub async fn wait<F: Future>(&self, timeout: Duration, future: F) -> Result<Option<F::Output>> {
        tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => Err(RabbitMQError::Interrupted),
            outcome = tokio::time::timeout(timeout, future) => Ok(outcome.ok()),
        }
    }

    /// Runs `future` to completion unless interrupted first.
    pub async fn guard<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => Err(RabbitMQError::Interrupted),
            outcome = future => outcome,
        }
    }
}

struct Connected<B: Broker> {
    connection: B::Connection,
    channel: B::Channel,
}

/// The live connection/channel pair of one runnable.
///
/// Only the runnable's own thread touches a `Link`; other threads read the
/// [`RunState`] flags instead.
pub struct Link<B: Broker> {
    broker: Arc<B>,
    name: String,
    state: Arc<RunState>,
    held: Option<Connected<B>>,
}

impl<B: Broker> Link<B> {
    pub fn new(broker: Arc<B>, name: &str, state: Arc<RunState>) -> Self {
        Self {
            broker,
            name: name.to_string(),
            state,
            held: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    pub fn channel(&self) -> Option<&B::Channel> {
        self.held.as_ref().map(|held| &held.channel)
    }

    /// Returns the held channel, connecting first if there is none.
    ///
    /// A fresh channel is handed to `hooks.connect_callback` before it is
    /// returned. When the callback fails the pair stays held so the caller's
    /// teardown releases it.
    pub async fn channel_connect<'a, H>(&'a mut self, hooks: &mut H) -> Result<&'a B::Channel>
    where
        H: Runnable<B> + ?Sized,
    {
        if self.held.is_none() {
            let connected = self.open().await?;
            let channel = &self.held.insert(connected).channel;
            self.state.guard(hooks.connect_callback(&self.name, channel)).await?;
            self.state.set_connected(true);
            info!(name = %self.name, "Connected");
        }

        self.held
            .as_ref()
            .map(|held| &held.channel)
            .ok_or_else(|| RabbitMQError::ChannelError("Channel is not available".to_string()))
    }

    async fn open(&self) -> Result<Connected<B>> {
        let connection = self.state.guard(self.broker.open_connection()).await?;

        match self.state.guard(connection.open_channel()).await {
            Ok(channel) => Ok(Connected {
                connection,
                channel,
            }),
            Err(e) => {
                close_connection_quietly(&connection).await;
                Err(e)
            }
        }
    }

    /// Drops the held pair, giving `hooks` the channel before it is closed.
    /// Close failures are logged and swallowed.
    pub async fn channel_disconnect<H>(&mut self, hooks: &mut H)
    where
        H: Runnable<B> + ?Sized,
    {
        self.state.set_connected(false);

        let Some(Connected {
            connection,
            channel,
        }) = self.held.take()
        else {
            return;
        };

        debug!(name = %self.name, "Disconnecting channel");
        hooks.disconnect_callback(&channel).await;

        close_channel_quietly(&channel).await;
        close_connection_quietly(&connection).await;
    }
}

/// Runs a cleanup step, failing with [`RabbitMQError::TimeoutError`] once
/// `limit` has passed.
pub(crate) async fn bounded<F>(limit: Duration, future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::time::timeout(limit, future).await?
}

async fn close_channel_quietly<C: BrokerChannel>(channel: &C) {
    if !channel.is_open() {
        return;
    }
    if let Err(e) = bounded(CLEANUP_TIMEOUT, channel.close()).await {
        warn!(error = %e, "While closing channel");
    }
}

async fn close_connection_quietly<C: BrokerConnection>(connection: &C) {
    if !connection.is_open() {
        return;
    }
    if let Err(e) = bounded(CLEANUP_TIMEOUT, connection.close()).await {
        warn!(error = %e, "While closing connection");
    }
}
