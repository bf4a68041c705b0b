//! Player configuration: tick periods and buffer watermarks.

use super::error::PlaybackResult;
use crate::playback_error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`AudioPlayer`](super::AudioPlayer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Nominal period of the fetch loop
    pub fetch_tick: Duration,

    /// Period of progress ticks sent to observers
    pub progress_tick: Duration,

    /// Remaining tick time below which the loop runs the next tick right away
    pub stability_window: Duration,

    /// Lookahead at which a tick stops fetching further chunks (seconds)
    pub prefetch_seconds: f64,

    /// Lookahead above which whole ticks skip fetching (seconds)
    pub high_mark_seconds: f64,

    /// Lookahead below which output is suspended until more audio is queued (seconds)
    pub low_mark_seconds: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            fetch_tick: Duration::from_millis(1000),
            progress_tick: Duration::from_millis(500),
            stability_window: Duration::from_millis(100),
            prefetch_seconds: 5.0,
            high_mark_seconds: 30.0,
            low_mark_seconds: 2.0,
        }
    }
}

impl PlayerConfig {
    /// Create configuration tuned for quick starts on a fast link
    pub fn low_latency() -> Self {
        Self {
            fetch_tick: Duration::from_millis(250),
            progress_tick: Duration::from_millis(250),
            stability_window: Duration::from_millis(25),
            prefetch_seconds: 2.0,
            high_mark_seconds: 10.0,
            low_mark_seconds: 0.5,
        }
    }

    /// Create configuration tuned for slow or jittery links
    pub fn network_streaming() -> Self {
        Self {
            fetch_tick: Duration::from_millis(1000),
            progress_tick: Duration::from_millis(500),
            stability_window: Duration::from_millis(100),
            prefetch_seconds: 10.0,
            high_mark_seconds: 60.0,
            low_mark_seconds: 4.0,
        }
    }

    /// Check that the watermarks are ordered and the periods usable.
    pub fn validate(&self) -> PlaybackResult<()> {
        if self.fetch_tick.is_zero() || self.progress_tick.is_zero() {
            return Err(playback_error!(InvalidConfig, "tick periods must be non-zero"));
        }
        if self.stability_window >= self.fetch_tick {
            return Err(playback_error!(
                InvalidConfig,
                "stability window {:?} must be shorter than the fetch tick {:?}",
                self.stability_window,
                self.fetch_tick
            ));
        }
        let marks = [
            self.low_mark_seconds,
            self.prefetch_seconds,
            self.high_mark_seconds,
        ];
        if marks.iter().any(|mark| !mark.is_finite() || *mark < 0.0) {
            return Err(playback_error!(
                InvalidConfig,
                "watermarks must be finite and non-negative"
            ));
        }
        if !(self.low_mark_seconds < self.prefetch_seconds
            && self.prefetch_seconds <= self.high_mark_seconds)
        {
            return Err(playback_error!(
                InvalidConfig,
                "expected low mark {} < prefetch {} <= high mark {}",
                self.low_mark_seconds,
                self.prefetch_seconds,
                self.high_mark_seconds
            ));
        }
        Ok(())
    }
}
