//! A leaky discrete-bucket limiter local to a single operation. Bursts up to
//! `limit` items per second are permitted; throughput averages to `limit`
//! items/second over time.

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_millis(1000);

/// What happened on this `tick()` call, so the caller knows whether to pulse
/// a progress emission independent of its own per-chunk progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Still inside the current window, under the limit.
    Counted,
    /// The limit was reached mid-window; the caller slept until the window
    /// elapsed.
    Throttled,
    /// The window had already elapsed on its own; counters were reset
    /// without sleeping.
    RolledOver,
}

impl Tick {
    /// Per §4.3: "a separate progress emit pulse is triggered on every
    /// window rollover and on every throttled sleep."
    pub fn should_pulse(self) -> bool {
        matches!(self, Tick::Throttled | Tick::RolledOver)
    }
}

pub struct RateLimiter {
    limit: Option<u64>,
    window_start: Instant,
    count: u64,
}

impl RateLimiter {
    /// `limit = None` means unbounded: `tick()` always returns `Counted`
    /// immediately, never sleeps.
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            window_start: Instant::now(),
            count: 0,
        }
    }

    pub async fn tick(&mut self) -> Tick {
        let Some(limit) = self.limit else {
            return Tick::Counted;
        };
        let elapsed = self.window_start.elapsed();
        if elapsed < WINDOW {
            self.count += 1;
            if self.count > limit {
                let remaining = WINDOW - elapsed;
                tokio::time::sleep(remaining).await;
                self.window_start = Instant::now();
                self.count = 0;
                return Tick::Throttled;
            }
            Tick::Counted
        } else {
            self.window_start = Instant::now();
            self.count = 0;
            Tick::RolledOver
        }
    }
}
