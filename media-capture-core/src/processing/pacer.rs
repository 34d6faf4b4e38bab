use std::thread;
use std::time::{Duration, Instant};

/// Remaining time below which the pacer spins instead of sleeping.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

/// Fixed-cadence deadline tracker on the monotonic clock.
///
/// The first tick is due immediately. After each tick the deadline moves one
/// period forward; if that is already in the past the pacer resynchronizes to
/// `now + period` instead of letting callers burst through missed ticks.
#[derive(Debug, Clone)]
pub struct FramePacer {
    period: Duration,
    next_deadline: Instant,
    resyncs: u64,
}

impl FramePacer {
    pub fn new(period: Duration) -> Self {
        Self::starting_at(period, Instant::now())
    }

    pub fn starting_at(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next_deadline: start,
            resyncs: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Times the deadline fell behind and was reset.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_deadline
    }

    /// Moves the deadline past a tick that ran at `now`. Returns `true` when
    /// the deadline had slipped and was resynchronized.
    pub fn advance(&mut self, now: Instant) -> bool {
        self.next_deadline += self.period;
        if self.next_deadline < now {
            self.next_deadline = now + self.period;
            self.resyncs += 1;
            return true;
        }
        false
    }

    /// Blocks until the next deadline: coarse sleep while more than a
    /// millisecond remains, then a short spin for the rest.
    pub fn wait_until_due(&self) {
        loop {
            let now = Instant::now();
            if now >= self.next_deadline {
                return;
            }
            let remaining = self.next_deadline - now;
            if remaining > SPIN_THRESHOLD {
                thread::sleep(remaining - SPIN_THRESHOLD);
            } else {
                std::hint::spin_loop();
            }
        }
    }
}
