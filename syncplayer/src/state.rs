//! Playback state machine states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`SyncPlayer`](crate::SyncPlayer)
///
/// `Idle → Preparing → Playing ⇄ Paused`; `release()` returns to `Idle` from
/// any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    /// No session, or released
    Idle,
    /// Transitioning towards playback
    Preparing,
    /// The polling thread is decoding and rendering
    Playing,
    /// Prepared, or paused by the caller or by a track failure
    Paused,
}

impl PlayerState {
    /// Whether the decode loop runs in this state
    pub fn is_active(&self) -> bool {
        matches!(self, PlayerState::Playing)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerState::Idle => write!(f, "Idle"),
            PlayerState::Preparing => write!(f, "Preparing"),
            PlayerState::Playing => write!(f, "Playing"),
            PlayerState::Paused => write!(f, "Paused"),
        }
    }
}
