//! Fixed-period tick pacing for the player's loops.

use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Paces a loop to a nominal period and counts overrun ticks.
///
/// A tick that finishes early sleeps for the rest of the period, unless less than the
/// stability window remains, in which case the next tick starts immediately. A tick that
/// overruns its period starts the next one immediately and reports how many periods it took.
#[derive(Debug, Clone)]
pub(crate) struct Clock {
    period: Duration,
    stability: Duration,
    skipped: u32,
}

impl Clock {
    pub(crate) fn new(period: Duration, stability: Duration) -> Self {
        Self {
            period,
            stability,
            skipped: 0,
        }
    }

    /// Ticks lost by the last overrun; zero when the last tick finished in time.
    pub(crate) fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Wait out the tick that began at `started`. Returns `false` once `stop` is cancelled.
    pub(crate) async fn pace(&mut self, started: Instant, stop: &CancellationToken) -> bool {
        let elapsed = started.elapsed();
        if elapsed >= self.period {
            let periods = elapsed.as_nanos() / self.period.as_nanos().max(1);
            self.skipped = u32::try_from(periods).unwrap_or(u32::MAX);
            return !stop.is_cancelled();
        }

        self.skipped = 0;
        let remaining = self.period - elapsed;
        if remaining < self.stability {
            return !stop.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            _ = sleep(remaining) => true,
        }
    }
}
