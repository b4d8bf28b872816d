//! # Event Bus System
//!
//! Provides an event-driven architecture for the whitelist engine using
//! `tokio::sync::broadcast`. Modules publish typed events without knowing who
//! listens; hosts subscribe to refresh views or write audit logs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐    emit     ┌───────────┐
//! │ Sync Coordinator ├────────────>│           │    subscribe    ┌────────────┐
//! └──────────────────┘             │ EventBus  ├────────────────>│ Subscriber │
//!                                  │ (broadcast│                 └────────────┘
//! ┌──────────────────┐    emit     │  channel) │    subscribe    ┌────────────┐
//! │ Cleanup Engine   ├────────────>│           ├────────────────>│ Subscriber │
//! └──────────────────┘             └───────────┘                 └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, WhitelistEvent};
//!
//! let event_bus = EventBus::new(100);
//! let event = CoreEvent::Whitelist(WhitelistEvent::SyncUnchanged {
//!     cycle_id: "cycle-1".to_string(),
//!     content_hash: "h1".to_string(),
//! });
//!
//! // No subscribers is not an error for publishers.
//! event_bus.emit(event).ok();
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Whitelist sync lifecycle events
    Whitelist(WhitelistEvent),
    /// Library content changes caused by policy enforcement
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Whitelist(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Whitelist(WhitelistEvent::SyncFailed {
                recoverable: true, ..
            }) => EventSeverity::Warning,
            CoreEvent::Whitelist(WhitelistEvent::SyncFailed { .. }) => EventSeverity::Error,
            CoreEvent::Whitelist(WhitelistEvent::SyncCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Library(LibraryEvent::ContentPurged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Whitelist Events
// ============================================================================

/// Events describing one sync cycle against the remote whitelist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum WhitelistEvent {
    /// A cycle began fetching the remote list.
    SyncStarted {
        cycle_id: String,
        /// What triggered the cycle ("startup", "background", "manual").
        trigger: String,
    },
    /// The remote hash matched the persisted snapshot; nothing was written.
    SyncUnchanged { cycle_id: String, content_hash: String },
    /// A changed list was applied and committed.
    SyncCompleted {
        cycle_id: String,
        content_hash: String,
        /// Artists newly whitelisted.
        added: u64,
        /// Artists no longer whitelisted.
        removed: u64,
        duration_ms: u64,
    },
    /// The cycle failed; the previous snapshot stays in effect.
    SyncFailed {
        cycle_id: String,
        message: String,
        /// Whether a later cycle is expected to succeed (network trouble).
        recoverable: bool,
    },
}

impl WhitelistEvent {
    fn description(&self) -> &str {
        match self {
            WhitelistEvent::SyncStarted { .. } => "Whitelist sync started",
            WhitelistEvent::SyncUnchanged { .. } => "Whitelist unchanged",
            WhitelistEvent::SyncCompleted { .. } => "Whitelist sync completed",
            WhitelistEvent::SyncFailed { .. } => "Whitelist sync failed",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

/// Events related to library content changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// Content of de-listed artists was removed from the catalog.
    ContentPurged {
        /// Artists whose removal triggered the purge.
        artist_ids: Vec<String>,
        songs: u64,
        albums: u64,
        playlists: u64,
        artists: u64,
    },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::ContentPurged { .. } => "Content of removed artists purged",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventSeverity, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let problems = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.severity() >= EventSeverity::Warning);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
