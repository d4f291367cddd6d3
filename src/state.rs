use log::warn;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

const MAX_HISTORY: usize = 50;

/// The lifecycle states a client connection moves through. `Closing` is the
/// brief window between sending/receiving a close frame and the transport
/// actually shutting down; `Closed` also covers "never connected".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    /// The transitions this crate considers legal. Grounded in the RFC 6455
    /// connection lifecycle: you can only open from closed, only close what's
    /// open or opening, and a closed connection has to go through `Connecting`
    /// again rather than jumping straight back to `Open`.
    fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Closed, Connecting)
                | (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: ConnectionState,
    to: ConnectionState,
    at: Instant,
}

struct Inner {
    current: ConnectionState,
    history: VecDeque<Transition>,
}

/// Owns the single source of truth for a connection's lifecycle state, guarded
/// by a `tokio::sync::Mutex` the way the teacher guards its writer half — one
/// lock, serialized access, safe to share via `Arc` across the send/receive/
/// heartbeat tasks.
///
/// Illegal transitions are silently rejected (logged at `warn!`) rather than
/// panicking: a stray late event from a task that's already moved on shouldn't
/// be able to crash the client.
pub struct StateManager {
    inner: Mutex<Inner>,
    notify: watch::Sender<ConnectionState>,
}

impl StateManager {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(ConnectionState::Closed);
        Self {
            inner: Mutex::new(Inner {
                current: ConnectionState::Closed,
                history: VecDeque::with_capacity(MAX_HISTORY),
            }),
            notify,
        }
    }

    pub async fn current(&self) -> ConnectionState {
        self.inner.lock().await.current
    }

    /// Attempts to move to `next`. Returns whether the transition was applied.
    pub async fn update(&self, next: ConnectionState) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.current.can_transition_to(next) {
            warn!(
                "rejected illegal connection state transition: {:?} -> {:?}",
                inner.current, next
            );
            return false;
        }

        let transition = Transition {
            from: inner.current,
            to: next,
            at: Instant::now(),
        };
        if inner.history.len() == MAX_HISTORY {
            inner.history.pop_front();
        }
        inner.history.push_back(transition);
        inner.current = next;
        drop(inner);

        // A send error here just means nobody's subscribed right now.
        let _ = self.notify.send(next);
        true
    }

    /// Blocks until `target` is reached or `timeout` elapses.
    pub async fn wait_for(
        &self,
        target: ConnectionState,
        wait_timeout: Duration,
    ) -> Result<(), crate::error::Error> {
        if self.current().await == target {
            return Ok(());
        }

        let mut receiver = self.notify.subscribe();
        timeout(wait_timeout, async {
            loop {
                if *receiver.borrow() == target {
                    return;
                }
                if receiver.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .map_err(crate::error::Error::from)
    }

    /// A fresh observer handle for callers who want to react to every state
    /// change rather than block on a single target.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.notify.subscribe()
    }

    /// Snapshot of recent transitions, oldest first, for diagnostics.
    pub async fn history(&self) -> Vec<(ConnectionState, ConnectionState)> {
        self.inner
            .lock()
            .await
            .history
            .iter()
            .map(|t| (t.from, t.to))
            .collect()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn legal_transitions_are_applied() {
        let manager = StateManager::new();
        assert!(manager.update(ConnectionState::Connecting).await);
        assert!(manager.update(ConnectionState::Open).await);
        assert_eq!(manager.current().await, ConnectionState::Open);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let manager = StateManager::new();
        assert!(!manager.update(ConnectionState::Open).await);
        assert_eq!(manager.current().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn wait_for_resolves_once_state_is_reached() {
        let manager = std::sync::Arc::new(StateManager::new());
        let waiter = manager.clone();
        let handle = tokio::spawn(async move {
            waiter
                .wait_for(ConnectionState::Open, Duration::from_secs(1))
                .await
        });

        manager.update(ConnectionState::Connecting).await;
        manager.update(ConnectionState::Open).await;

        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn wait_for_times_out_if_state_is_never_reached() {
        let manager = StateManager::new();
        let result = manager
            .wait_for(ConnectionState::Open, Duration::from_millis(20))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let manager = StateManager::new();
        for _ in 0..60 {
            manager.update(ConnectionState::Connecting).await;
            manager.update(ConnectionState::Closed).await;
        }
        assert!(manager.history().await.len() <= MAX_HISTORY);
    }
}
