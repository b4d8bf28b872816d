//! Observable sync state
//!
//! [`ProgressPublisher`] holds the single process-wide [`SyncState`] and
//! fans every transition out to subscribers. A new subscriber first sees the
//! current state and then each later transition, in order. Publishing never
//! waits on a slow subscriber: the channel is bounded and a subscriber that
//! falls behind is told how many states it skipped.
//!
//! Only the sync coordinator publishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::RecvError;

/// Default number of transitions buffered per subscriber.
pub const DEFAULT_PROGRESS_CAPACITY: usize = 32;

/// Phase of a running cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Fetching,
    Diffing,
    Cleaning,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Fetching => "fetching",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Cleaning => "cleaning",
        };
        f.write_str(name)
    }
}

/// State of the whitelist sync, as shown to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Running {
        phase: SyncPhase,
        started_at: DateTime<Utc>,
    },
    Succeeded {
        at: DateTime<Utc>,
        /// Artists added plus artists removed
        changed_count: usize,
    },
    Failed {
        at: DateTime<Utc>,
        reason: String,
    },
}

impl SyncState {
    pub fn is_running(&self) -> bool {
        matches!(self, SyncState::Running { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncState::Failed { .. })
    }
}

/// Holder and broadcaster of the current [`SyncState`].
pub struct ProgressPublisher {
    current: Mutex<SyncState>,
    sender: broadcast::Sender<SyncState>,
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            current: Mutex::new(SyncState::Idle),
            sender,
        }
    }

    /// The latest published state.
    pub fn current(&self) -> SyncState {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to transitions. Drop the stream to unsubscribe.
    pub fn subscribe(&self) -> SyncStateStream {
        // Snapshot and subscription happen under the same lock as publish,
        // so no transition falls between them or shows up twice.
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        SyncStateStream {
            replay: Some(current.clone()),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn publish(&self, state: SyncState) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = state.clone();
        // No subscribers is fine.
        let _ = self.sender.send(state);
    }

    /// Publish `state` only while a cycle is still running.
    ///
    /// Returns `false` when the cycle already reached a terminal state, which
    /// is then left in place.
    pub(crate) fn publish_if_running(&self, state: SyncState) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if !current.is_running() {
            return false;
        }
        *current = state.clone();
        let _ = self.sender.send(state);
        true
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_CAPACITY)
    }
}

impl fmt::Debug for ProgressPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressPublisher")
            .field("current", &self.current())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Transitions seen by one subscriber, starting with the state current at
/// subscription time.
pub struct SyncStateStream {
    replay: Option<SyncState>,
    receiver: broadcast::Receiver<SyncState>,
}

impl SyncStateStream {
    /// Next state in emission order.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` when `n` states were skipped because this
    /// subscriber fell behind; later calls continue with the oldest state
    /// still buffered. `RecvError::Closed` once the publisher is gone.
    pub async fn recv(&mut self) -> Result<SyncState, RecvError> {
        if let Some(state) = self.replay.take() {
            return Ok(state);
        }
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is
    /// pending.
    pub fn try_recv(&mut self) -> Option<Result<SyncState, RecvError>> {
        if let Some(state) = self.replay.take() {
            return Some(Ok(state));
        }
        match self.receiver.try_recv() {
            Ok(state) => Some(Ok(state)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Err(RecvError::Lagged(n))),
            Err(broadcast::error::TryRecvError::Closed) => Some(Err(RecvError::Closed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn running(phase: SyncPhase) -> SyncState {
        SyncState::Running {
            phase,
            started_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_starts_idle() {
        let publisher = ProgressPublisher::default();
        assert_eq!(publisher.current(), SyncState::Idle);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_current_state_first() {
        let publisher = ProgressPublisher::default();
        publisher.publish(running(SyncPhase::Fetching));
        publisher.publish(running(SyncPhase::Diffing));

        let mut stream = publisher.subscribe();
        publisher.publish(running(SyncPhase::Cleaning));

        assert_eq!(stream.recv().await.unwrap(), running(SyncPhase::Diffing));
        assert_eq!(stream.recv().await.unwrap(), running(SyncPhase::Cleaning));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_how_many_it_missed() {
        let publisher = ProgressPublisher::new(2);
        let mut stream = publisher.subscribe();
        assert_eq!(stream.recv().await.unwrap(), SyncState::Idle);

        for _ in 0..5 {
            publisher.publish(running(SyncPhase::Fetching));
        }

        assert!(matches!(stream.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(stream.recv().await.unwrap(), running(SyncPhase::Fetching));
    }

    #[tokio::test]
    async fn test_publish_if_running_keeps_terminal_state() {
        let publisher = ProgressPublisher::default();
        let failed = SyncState::Failed {
            at: DateTime::<Utc>::UNIX_EPOCH,
            reason: "timed out".to_string(),
        };

        assert!(!publisher.publish_if_running(failed.clone()));
        assert_eq!(publisher.current(), SyncState::Idle);

        publisher.publish(running(SyncPhase::Fetching));
        let succeeded = SyncState::Succeeded {
            at: DateTime::<Utc>::UNIX_EPOCH,
            changed_count: 1,
        };
        publisher.publish(succeeded.clone());

        let mut stream = publisher.subscribe();
        assert!(!publisher.publish_if_running(failed.clone()));
        assert_eq!(publisher.current(), succeeded);
        assert_eq!(stream.recv().await.unwrap(), succeeded);
        assert!(stream.try_recv().is_none());

        publisher.publish(running(SyncPhase::Fetching));
        assert!(publisher.publish_if_running(failed.clone()));
        assert_eq!(publisher.current(), failed);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let publisher = ProgressPublisher::default();
        let first = publisher.subscribe();
        let second = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        drop(first);
        assert_eq!(publisher.subscriber_count(), 1);
        drop(second);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_see_no_gaps() {
        let publisher = Arc::new(ProgressPublisher::new(64));
        let writer = {
            let publisher = publisher.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    publisher.publish(SyncState::Succeeded {
                        at: DateTime::<Utc>::UNIX_EPOCH,
                        changed_count: i,
                    });
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut stream = publisher.subscribe();
        writer.await.unwrap();

        let mut last: Option<usize> = None;
        while let Some(Ok(state)) = stream.try_recv() {
            let count = match state {
                SyncState::Succeeded { changed_count, .. } => changed_count,
                SyncState::Idle => continue,
                other => panic!("unexpected state {:?}", other),
            };
            if let Some(previous) = last {
                assert_eq!(count, previous + 1);
            }
            last = Some(count);
        }
        assert_eq!(last, Some(19));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&running(SyncPhase::Cleaning)).unwrap();
        assert!(json.contains("\"state\":\"running\""));
        assert!(json.contains("\"phase\":\"cleaning\""));

        let back: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, running(SyncPhase::Cleaning));
    }
}
