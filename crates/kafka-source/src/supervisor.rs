//! Long-running consumption loop with a blocking stop.
//!
//! [`Supervisor::start`] spawns a task that keeps starting consumer group
//! sessions until it is cancelled. Failed sessions are logged and retried
//! according to a [`RetryPolicy`]. [`StopHandle::stop`] cancels the loop and
//! only returns after the task has exited, so no span is being handled and no
//! session is being started once it returns.
//!
//! Cancellation is only observed between session attempts by the loop itself.
//! In-flight claims are unwound by the [`ConsumerGroup`] implementation, which
//! receives the same token.

use crate::error::Result;
use crate::group::{ConsumerGroup, GroupHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a consumption loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// How failed sessions are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up after this many failed sessions in a row. `None` never gives up.
    pub max_consecutive_failures: Option<u32>,
    /// Pause after a failed session. Zero retries immediately.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Retry every failure immediately, forever.
    pub fn unlimited() -> Self {
        Self {
            max_consecutive_failures: None,
            delay: Duration::ZERO,
        }
    }

    pub fn bounded(max_consecutive_failures: u32, delay: Duration) -> Self {
        Self {
            max_consecutive_failures: Some(max_consecutive_failures),
            delay,
        }
    }

    fn exhausted(&self, consecutive_failures: u32) -> bool {
        self.max_consecutive_failures
            .is_some_and(|max| consecutive_failures >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// A consumption loop that has not been started yet.
pub struct Supervisor<G> {
    group: G,
    topic: String,
    handler: Arc<dyn GroupHandler>,
    retry_policy: RetryPolicy,
}

impl<G: ConsumerGroup> Supervisor<G> {
    pub fn new(group: G, topic: impl Into<String>, handler: Arc<dyn GroupHandler>) -> Self {
        Self {
            group,
            topic: topic.into(),
            handler,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Always [`SupervisorState::Idle`]: starting consumes the supervisor,
    /// and the running loop reports through [`StopHandle::state`].
    pub fn state(&self) -> SupervisorState {
        SupervisorState::Idle
    }

    /// Probe the consumer group and spawn the consumption loop.
    ///
    /// A failing probe is returned to the caller; once running, session errors
    /// are only logged.
    pub async fn start(self) -> Result<StopHandle> {
        self.group.check(&self.topic).await?;

        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SupervisorState::Running);
        let state_tx = Arc::new(state_tx);

        info!("Starting span consumer for topic {}", self.topic);

        let task = tokio::spawn(run(
            self.group,
            self.topic,
            self.handler,
            self.retry_policy,
            cancel.clone(),
            Arc::clone(&state_tx),
        ));

        Ok(StopHandle {
            cancel,
            task: Mutex::new(Some(task)),
            state_tx,
            state_rx,
        })
    }
}

/// Publishes `Stopped` when the loop exits, including by unwinding.
struct StoppedOnExit(Arc<watch::Sender<SupervisorState>>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.send_replace(SupervisorState::Stopped);
    }
}

async fn run<G: ConsumerGroup>(
    group: G,
    topic: String,
    handler: Arc<dyn GroupHandler>,
    retry_policy: RetryPolicy,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SupervisorState>>,
) {
    let _stopped = StoppedOnExit(state);
    let mut consecutive_failures = 0u32;

    while !cancel.is_cancelled() {
        match group.consume(&cancel, &topic, Arc::clone(&handler)).await {
            Ok(()) => {
                debug!("Consumer group session for topic {topic} ended");
                consecutive_failures = 0;
                tokio::task::yield_now().await;
            }
            Err(e) => {
                warn!("Error during consumer group session: {e}");
                consecutive_failures += 1;

                if retry_policy.exhausted(consecutive_failures) {
                    error!(
                        "Giving up on topic {topic} after {consecutive_failures} consecutive session failures"
                    );
                    break;
                }

                if retry_policy.delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(retry_policy.delay) => {}
                    }
                }
            }
        }
    }

    info!("Span consumer for topic {topic} stopped");
}

/// Handle to a running consumption loop.
///
/// Dropping the handle cancels the loop without waiting for it.
pub struct StopHandle {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    state_tx: Arc<watch::Sender<SupervisorState>>,
    state_rx: watch::Receiver<SupervisorState>,
}

impl StopHandle {
    /// Cancel the loop and wait until it has fully exited.
    ///
    /// Safe to call repeatedly and from several tasks at once: every call
    /// returns only after the loop is gone.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;

        self.state_tx.send_if_modified(|state| {
            if *state == SupervisorState::Running {
                *state = SupervisorState::Stopping;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();

        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!("Span consumer task failed: {e}");
            }
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_rx.borrow()
    }

    /// Resolves once the loop has exited, whether stopped or gave up on its own.
    pub async fn stopped(&self) {
        let mut state_rx = self.state_rx.clone();
        // The sender lives as long as self, so this only errors if it is dropped.
        let _ = state_rx
            .wait_for(|state| *state == SupervisorState::Stopped)
            .await;
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
