use std::time::Duration;

use tracing::{trace, warn};

/// how often pending attempts are polled when nothing else is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// shortest interval a scheduler will tick at
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Run state of the periodic poll. The session drives the actual ticks,
/// the scheduler only records whether they should happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollScheduler {
    interval: Duration,
    running: bool,
    ticks: u64,
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PollScheduler {
    /// a stopped scheduler. Intervals below [`MIN_POLL_INTERVAL`] are raised
    /// to it
    pub fn new(interval: Duration) -> Self {
        if interval < MIN_POLL_INTERVAL {
            warn!(?interval, min = ?MIN_POLL_INTERVAL, "poll interval too short, using minimum");
        }
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            running: false,
            ticks: 0,
        }
    }

    /// start ticking, returns false if already running
    pub fn start(&mut self) -> bool {
        let changed = !self.running;
        self.running = true;
        if changed {
            trace!(interval = ?self.interval, "poll scheduler started");
        }
        changed
    }

    /// stop ticking, returns false if already stopped
    pub fn stop(&mut self) -> bool {
        let changed = self.running;
        self.running = false;
        if changed {
            trace!(ticks = self.ticks, "poll scheduler stopped");
        }
        changed
    }

    /// whether ticks should happen
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// time between ticks
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// ticks run since creation
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub(crate) fn record_tick(&mut self) {
        self.ticks += 1;
    }
}
