// src/rabbitmq/supervisor.rs
// Keeps one runnable alive: connect lazily, run one unit of work per tick,
// tear down and back off on failure, always release the connection on exit.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

use super::backoff::BackoffPolicy;
use super::broker::Broker;
use super::connection::{Link, RunState};
use super::errors::{RabbitMQError, Result};
use crate::config::AmqpConfig;

/// Outcome of a single unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Run another tick.
    Continue,
    /// Leave the run loop.
    Stop,
}

/// The pluggable part of a supervised runnable.
#[async_trait]
pub trait Runnable<B: Broker>: Send {
    /// Short label for logs and thread names, e.g. `queue-consumer`.
    fn service_type(&self) -> &'static str;

    /// Called once for every freshly opened channel.
    async fn connect_callback(&mut self, name: &str, channel: &B::Channel) -> Result<()>;

    /// Called with the channel right before it is closed.
    async fn disconnect_callback(&mut self, _channel: &B::Channel) {}

    /// One tick of work. Errors other than [`RabbitMQError::Interrupted`] are
    /// retried after a backoff delay.
    async fn process(&mut self, link: &mut Link<B>) -> Result<Tick>;
}

/// Runs a [`Runnable`] until it is shut down, interrupted or asks to stop.
pub struct Supervisor<B: Broker, R: Runnable<B>> {
    runnable: R,
    link: Link<B>,
    state: Arc<RunState>,
    policy: BackoffPolicy,
    enabled: bool,
    attempt: u32,
}

impl<B: Broker, R: Runnable<B>> Supervisor<B, R> {
    pub fn new(broker: Arc<B>, config: &AmqpConfig, name: &str, runnable: R) -> Self {
        let state = RunState::new();
        Self {
            runnable,
            link: Link::new(broker, name, Arc::clone(&state)),
            state,
            policy: BackoffPolicy::from_config(config),
            enabled: config.enabled,
            attempt: 0,
        }
    }

    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    pub fn name(&self) -> &str {
        self.link.name()
    }

    pub async fn run(mut self) {
        let service = self.runnable.service_type();
        let name = self.link.name().to_string();

        if !self.enabled {
            info!(service, name = %name, "Runnable is disabled, not starting");
            self.state.shutdown();
            return;
        }

        debug!(service, name = %name, "Starting");

        while self.state.is_running() {
            match self.runnable.process(&mut self.link).await {
                Ok(Tick::Continue) => {
                    self.attempt = 0;
                }
                Ok(Tick::Stop) => break,
                Err(e) if e.is_interrupted() => {
                    trace!(service, name = %name, "Terminated by interrupt");
                    break;
                }
                Err(e) => {
                    if self.backoff(&e).await.is_err() {
                        trace!(service, name = %name, "Interrupted during backoff");
                        break;
                    }
                }
            }
        }

        debug!(service, name = %name, "Stopping");
        self.state.shutdown();
        self.link.channel_disconnect(&mut self.runnable).await;
    }

    async fn backoff(&mut self, cause: &RabbitMQError) -> Result<()> {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.policy.next_delay(self.attempt);

        warn!(
            service = self.runnable.service_type(),
            name = %self.link.name(),
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "Could not talk to broker, backing off"
        );

        self.link.channel_disconnect(&mut self.runnable).await;
        self.state.sleep(delay).await
    }

    /// Runs the supervisor on a dedicated thread with its own runtime.
    pub fn spawn(self) -> Result<RunnerHandle>
    where
        R: 'static,
    {
        let state = self.state();
        let thread_name = format!("{}-{}", self.runnable.service_type(), self.name());

        let thread = thread::Builder::new().name(thread_name).spawn(move || {
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime.block_on(self.run()),
                Err(e) => {
                    error!(error = %e, "Could not build runtime for runnable");
                    self.state.shutdown();
                }
            }
        })?;

        Ok(RunnerHandle { thread, state })
    }
}

/// Handle to a runnable's thread.
#[derive(Debug)]
pub struct RunnerHandle {
    thread: JoinHandle<()>,
    state: Arc<RunState>,
}

impl RunnerHandle {
    pub fn interrupt(&self) {
        self.state.interrupt();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<()> {
        self.thread.join().map_err(|_| {
            RabbitMQError::CallbackError("runnable thread panicked".to_string())
        })
    }
}

/// A supervised consumer or publisher that has not necessarily been started yet.
pub struct AmqpRunnable<B: Broker, R: Runnable<B>> {
    name: String,
    state: Arc<RunState>,
    pending: Mutex<Option<Supervisor<B, R>>>,
}

impl<B: Broker, R: Runnable<B> + 'static> AmqpRunnable<B, R> {
    pub fn new(supervisor: Supervisor<B, R>) -> Self {
        Self {
            name: supervisor.name().to_string(),
            state: supervisor.state(),
            pending: Mutex::new(Some(supervisor)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the run loop on its own thread. A runnable starts at most once.
    pub fn start(&self) -> Result<RunnerHandle> {
        self.take_supervisor()?.spawn()
    }

    /// Hands out the supervisor for callers that drive it on their own runtime.
    /// Counts as starting the runnable.
    pub fn take_supervisor(&self) -> Result<Supervisor<B, R>> {
        self.pending
            .lock()
            .map_err(|_| RabbitMQError::LockError)?
            .take()
            .ok_or(RabbitMQError::AlreadyStarted)
    }

    /// Asks the loop to stop at the top of its next tick. Pending waits are not
    /// cut short; use [`AmqpRunnable::interrupt`] for that.
    pub fn shutdown(&self) {
        self.state.shutdown();
    }

    pub fn interrupt(&self) {
        self.state.interrupt();
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub(crate) fn run_state(&self) -> &Arc<RunState> {
        &self.state
    }
}
