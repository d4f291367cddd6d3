use crate::error::Error;
use crate::reconnect::strategy::{ReconnectOutcome, ReconnectStrategy};
use log::{info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Idle,
    Reconnecting(u32),
    Waiting { next_attempt: u32 },
    Stopped,
}

#[derive(Debug, Clone)]
pub enum ReconnectEvent {
    Started { attempt: u32 },
    Failed { attempt: u32, error: String },
    Succeeded { attempt: u32, elapsed: Duration },
    Abandoned { last_error: String },
    StatusUpdate(ReconnectState),
}

type ConnectAction =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> + Send + Sync>;

/// Drives the reconnect loop for one client. Owns the strategy and the
/// cancellation flag; the actual "how to connect" logic is injected as a
/// closure so this module stays ignorant of transport/handshake details,
/// mirroring the teacher's preference for composing behavior through channel
/// senders and closures rather than back-references into the owning struct.
pub struct ReconnectManager {
    strategy: Mutex<Box<dyn ReconnectStrategy>>,
    state: Mutex<ReconnectState>,
    cancelled: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ReconnectEvent>,
}

impl ReconnectManager {
    pub fn new(
        strategy: Box<dyn ReconnectStrategy>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ReconnectEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            strategy: Mutex::new(strategy),
            state: Mutex::new(ReconnectState::Idle),
            cancelled: Arc::new(AtomicBool::new(false)),
            enabled: Arc::new(AtomicBool::new(true)),
            events,
        });
        (manager, receiver)
    }

    /// User-intent switch, per §4.7 step 1 ("check `enabled`; stop if
    /// disabled"). `Client::close` disables the manager before stopping it,
    /// so a reconnect that was mid-wait doesn't immediately restart.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub async fn state(&self) -> ReconnectState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: ReconnectState) {
        *self.state.lock().await = state;
        let _ = self.events.send(ReconnectEvent::StatusUpdate(state));
    }

    /// Cancels any in-progress wait and marks the manager stopped. Idempotent.
    pub async fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.set_state(ReconnectState::Stopped).await;
    }

    /// Synchronously moves the state out of `Idle` before `run` is spawned as
    /// a background task. Without this, a caller polling `state()` right
    /// after spawning could observe the manager's constructor-time `Idle`
    /// value and mistake "hasn't started yet" for "already succeeded".
    pub async fn mark_pending(&self) {
        self.set_state(ReconnectState::Waiting { next_attempt: 1 }).await;
    }

    /// Runs the reconnect loop in response to `trigger`, calling `connect`
    /// on each attempt. Returns once the loop lands in `Idle` (success) or
    /// `Stopped` (abandoned or cancelled).
    pub async fn run(self: Arc<Self>, trigger: Error, connect: ConnectAction) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
        let mut attempt: u32 = 1;
        let mut last_error = trigger;

        loop {
            if !self.enabled.load(Ordering::SeqCst) {
                self.set_state(ReconnectState::Stopped).await;
                return;
            }

            let should_continue = self
                .strategy
                .lock()
                .await
                .should_reconnect(&last_error, attempt);
            if !should_continue {
                warn!("reconnect abandoned after {attempt} attempt(s): {last_error}");
                let _ = self.events.send(ReconnectEvent::Abandoned {
                    last_error: last_error.to_string(),
                });
                self.set_state(ReconnectState::Stopped).await;
                return;
            }

            self.set_state(ReconnectState::Waiting {
                next_attempt: attempt,
            })
            .await;
            let delay = self.strategy.lock().await.delay_before(attempt);
            sleep(delay).await;
            if self.cancelled.load(Ordering::SeqCst) {
                self.set_state(ReconnectState::Stopped).await;
                return;
            }

            self.set_state(ReconnectState::Reconnecting(attempt)).await;
            let _ = self.events.send(ReconnectEvent::Started { attempt });
            let started_at = Instant::now();

            match connect().await {
                Ok(()) => {
                    info!("reconnect succeeded on attempt {attempt}");
                    let mut strategy = self.strategy.lock().await;
                    strategy.reset();
                    strategy.record(ReconnectOutcome::Succeeded);
                    drop(strategy);
                    let _ = self.events.send(ReconnectEvent::Succeeded {
                        attempt,
                        elapsed: started_at.elapsed(),
                    });
                    self.set_state(ReconnectState::Idle).await;
                    return;
                }
                Err(error) => {
                    self.strategy.lock().await.record(ReconnectOutcome::Failed);
                    let _ = self.events.send(ReconnectEvent::Failed {
                        attempt,
                        error: error.to_string(),
                    });
                    last_error = error;
                    attempt += 1;
                }
            }

            if self.cancelled.load(Ordering::SeqCst) {
                self.set_state(ReconnectState::Stopped).await;
                return;
            }
        }
    }

    /// Bypasses the backoff schedule entirely for a single connect attempt.
    pub async fn reconnect_immediately(&self, connect: ConnectAction) -> Result<(), Error> {
        self.set_state(ReconnectState::Reconnecting(0)).await;
        let result = connect().await;
        match &result {
            Ok(()) => {
                self.strategy.lock().await.reset();
                self.set_state(ReconnectState::Idle).await;
            }
            Err(_) => {
                self.set_state(ReconnectState::Stopped).await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::strategy::FixedInterval;
    use std::sync::atomic::AtomicU32;

    fn connect_action(
        succeed_on_attempt: u32,
        counter: Arc<AtomicU32>,
    ) -> ConnectAction {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt >= succeed_on_attempt {
                    Ok(())
                } else {
                    Err(Error::ConnectionTimeout)
                }
            })
        })
    }

    #[tokio::test]
    async fn succeeds_after_a_few_failures() {
        let strategy = Box::new(FixedInterval {
            delay: Duration::from_millis(1),
            max_attempts: 10,
        });
        let (manager, mut events) = ReconnectManager::new(strategy);
        let counter = Arc::new(AtomicU32::new(0));

        manager
            .clone()
            .run(Error::ConnectionTimeout, connect_action(3, counter))
            .await;

        assert_eq!(manager.state().await, ReconnectState::Idle);

        let mut saw_succeeded = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ReconnectEvent::Succeeded { .. }) {
                saw_succeeded = true;
            }
        }
        assert!(saw_succeeded);
    }

    #[tokio::test]
    async fn abandons_after_exhausting_attempts() {
        let strategy = Box::new(FixedInterval {
            delay: Duration::from_millis(1),
            max_attempts: 2,
        });
        let (manager, mut events) = ReconnectManager::new(strategy);
        let counter = Arc::new(AtomicU32::new(0));

        manager
            .clone()
            .run(Error::ConnectionTimeout, connect_action(100, counter))
            .await;

        assert_eq!(manager.state().await, ReconnectState::Stopped);

        let mut saw_abandoned = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ReconnectEvent::Abandoned { .. }) {
                saw_abandoned = true;
            }
        }
        assert!(saw_abandoned);
    }

    #[tokio::test]
    async fn reconnect_immediately_bypasses_the_schedule() {
        let strategy = Box::new(FixedInterval {
            delay: Duration::from_secs(60),
            max_attempts: 10,
        });
        let (manager, _events) = ReconnectManager::new(strategy);
        let counter = Arc::new(AtomicU32::new(0));

        let result = manager.reconnect_immediately(connect_action(1, counter)).await;
        assert!(result.is_ok());
        assert_eq!(manager.state().await, ReconnectState::Idle);
    }
}
