use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Authoritative playback state for a room.
///
/// Stored in the shared backend and used as the fallback initial state for
/// joiners that cannot obtain live state from a peer. `last_updated` is
/// monotone non-decreasing per room; ties are broken last-writer-wins inside
/// a single lock holder's transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    /// Position in seconds. Never negative.
    pub current_time: f64,
    /// Media duration in seconds; 0.0 when unknown.
    #[serde(default)]
    pub duration: f64,
    #[serde(default = "default_rate")]
    pub playback_rate: f64,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default = "UserId::nil")]
    pub updated_by: UserId,
}

fn default_rate() -> f64 {
    1.0
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
            last_updated: Utc::now(),
            updated_by: UserId::nil(),
        }
    }
}

impl PlaybackState {
    /// Set the playhead, clamping into the valid range.
    ///
    /// Negative positions are rejected upstream by the codec; the clamp here
    /// guards the `current_time <= duration` invariant when a duration is
    /// known.
    pub fn set_position(&mut self, seconds: f64) {
        let mut position = seconds.max(0.0);
        if self.duration > 0.0 {
            position = position.min(self.duration);
        }
        self.current_time = position;
    }

    /// Stamp the mutation, keeping `last_updated` monotone for the room.
    pub fn touch(&mut self, user: UserId, now: DateTime<Utc>) {
        self.last_updated = self.last_updated.max(now);
        self.updated_by = user;
    }

    /// Estimate the live position given wall-clock elapsed since the last
    /// update. Paused state reports the stored position unchanged.
    pub fn projected_position(&self, now: DateTime<Utc>) -> f64 {
        if !self.is_playing {
            return self.current_time;
        }
        let elapsed = (now - self.last_updated).num_milliseconds() as f64 / 1000.0;
        let projected = self.current_time + elapsed.max(0.0) * self.playback_rate;
        if self.duration > 0.0 {
            projected.min(self.duration)
        } else {
            projected
        }
    }
}
