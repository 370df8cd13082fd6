//! Event system for playback lifecycle events

use crate::state::PlayerState;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Events a player emits during a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlayerEvent {
    /// The playback state changed
    StateChanged {
        /// Previous state
        from: PlayerState,
        /// New state
        to: PlayerState,
    },
    /// `prepare()` succeeded
    Prepared {
        /// Longest track duration, if any track declared one
        duration_us: Option<i64>,
    },
    /// Both decoders reached end of stream; sent once per playback run
    Ended,
    /// A track failed and playback was paused
    Error {
        /// Description of the failure
        message: String,
    },
}

impl PlayerEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::StateChanged { .. } => "state_changed",
            PlayerEvent::Prepared { .. } => "prepared",
            PlayerEvent::Ended => "ended",
            PlayerEvent::Error { .. } => "error",
        }
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, PlayerEvent::Error { .. })
    }
}

/// Stream of player events for async iteration
///
/// Each stream sees the events sent after it was created. A stream that falls
/// more than the configured capacity behind skips the oldest events.
#[derive(Debug)]
pub struct PlayerEvents {
    receiver: broadcast::Receiver<PlayerEvent>,
}

impl PlayerEvents {
    pub(crate) fn new(receiver: broadcast::Receiver<PlayerEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event, or `None` once the player is gone
    pub async fn next(&mut self) -> Option<PlayerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    debug!(event = event.event_type(), "Delivering player event");
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Option<PlayerEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged, events dropped");
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }
}
