//! Headless output clocked by tokio time.
//!
//! Nothing is rendered; scheduled segments are recorded so hosts and tests can inspect what
//! would have been played and when. Under a paused tokio clock the output is fully
//! deterministic.

use super::error::{PlaybackError, PlaybackResult};
use super::traits::{AudioOutput, OutputFactory};
use crate::streaming::Segment;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// A segment together with the output time it was scheduled at.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSegment {
    /// Output time in seconds.
    pub at: f64,
    /// The scheduled audio.
    pub segment: Segment,
}

#[derive(Debug)]
struct VirtualState {
    banked: Duration,
    running_since: Option<Instant>,
    closed: bool,
    scheduled: Vec<ScheduledSegment>,
}

impl VirtualState {
    fn elapsed(&self) -> Duration {
        self.banked + self.running_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.banked += since.elapsed();
        }
    }
}

/// An [`AudioOutput`] that only keeps time.
#[derive(Debug)]
pub struct VirtualOutput {
    sample_rate: u32,
    channels: usize,
    state: Mutex<VirtualState>,
}

impl VirtualOutput {
    /// Create a suspended output.
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            state: Mutex::new(VirtualState {
                banked: Duration::ZERO,
                running_since: None,
                closed: false,
                scheduled: Vec::new(),
            }),
        }
    }

    /// Sample rate segments must have.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count segments must have.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Everything scheduled so far, in scheduling order.
    pub fn scheduled(&self) -> Vec<ScheduledSegment> {
        self.state.lock().scheduled.clone()
    }

    /// Number of segments scheduled so far.
    pub fn scheduled_count(&self) -> usize {
        self.state.lock().scheduled.len()
    }
}

impl AudioOutput for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().elapsed().as_secs_f64()
    }

    fn schedule(&self, segment: Segment, at: f64) -> PlaybackResult<()> {
        if segment.channel_count() != self.channels || segment.len() != self.sample_rate as usize
        {
            return Err(PlaybackError::output(format!(
                "segment of {} channels x {} samples does not fit a {} channel {} Hz output",
                segment.channel_count(),
                segment.len(),
                self.channels,
                self.sample_rate
            )));
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(PlaybackError::output("output closed"));
        }
        state.scheduled.push(ScheduledSegment { at, segment });
        Ok(())
    }

    fn suspend(&self) {
        self.state.lock().stop();
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        if !state.closed && state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
    }

    fn is_suspended(&self) -> bool {
        self.state.lock().running_since.is_none()
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.stop();
        state.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// [`OutputFactory`] creating [`VirtualOutput`]s.
///
/// Only the most recent output is held on to, for inspection; earlier ones are released once
/// their sessions drop them.
#[derive(Debug, Clone, Default)]
pub struct VirtualOutputs {
    last: Arc<Mutex<Option<Arc<VirtualOutput>>>>,
    count: Arc<AtomicUsize>,
}

impl VirtualOutputs {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently created output.
    pub fn last(&self) -> Option<Arc<VirtualOutput>> {
        self.last.lock().clone()
    }

    /// Number of outputs created so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl OutputFactory for VirtualOutputs {
    fn create(&self, sample_rate: u32, channels: usize) -> PlaybackResult<Arc<dyn AudioOutput>> {
        let output = Arc::new(VirtualOutput::new(sample_rate, channels));
        *self.last.lock() = Some(Arc::clone(&output));
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(output)
    }
}
