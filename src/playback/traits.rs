//! Core traits for audio output.

use super::error::PlaybackResult;
use crate::streaming::Segment;
use std::sync::Arc;

/// An output clock that plays segments at scheduled times.
///
/// Times are seconds on the output's own clock, which starts at zero and only advances while
/// the output is running. Outputs are created suspended.
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock in seconds. Frozen while suspended or closed.
    fn current_time(&self) -> f64;

    /// Queue `segment` to start playing at output time `at`.
    fn schedule(&self, segment: Segment, at: f64) -> PlaybackResult<()>;

    /// Stop the clock; queued segments wait.
    fn suspend(&self);

    /// Restart the clock. No effect once closed.
    fn resume(&self);

    /// Check if the clock is stopped
    fn is_suspended(&self) -> bool;

    /// Release the output. Further scheduling fails.
    fn close(&self);

    /// Check if the output was closed
    fn is_closed(&self) -> bool;
}

/// Creates one output per playback session.
pub trait OutputFactory: Send + Sync {
    /// Create a suspended output for the given format.
    fn create(&self, sample_rate: u32, channels: usize) -> PlaybackResult<Arc<dyn AudioOutput>>;
}

impl<F> OutputFactory for F
where
    F: Fn(u32, usize) -> PlaybackResult<Arc<dyn AudioOutput>> + Send + Sync,
{
    fn create(&self, sample_rate: u32, channels: usize) -> PlaybackResult<Arc<dyn AudioOutput>> {
        self(sample_rate, channels)
    }
}
