use std::ops::ControlFlow;
use std::time::Duration;

use quanta::Instant;
use serde::Deserialize;

use crate::Reason;

/// What happens to the cursor advance taken by a request that ends up denied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyPolicy {
    /// The denied request keeps its reserved slot. Repeated attempts push the
    /// cursor further out, so the k-th excess request is told to wait k intervals.
    #[default]
    Reserve,
    /// The advance is rolled back, matching a classic token bucket that never
    /// charges rejected requests.
    Refund,
}

/// Burst-one token bucket expressed as a single virtual-time cursor.
///
/// The cursor is the moment the next unit may start. Taking a unit starts it at
/// `max(cursor, now)` and moves the cursor one refill interval past that start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualCursor {
    cursor: Instant,
    interval: Duration,
}

impl VirtualCursor {
    /// A bucket created at `now` holds exactly one unit.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            cursor: now,
            interval,
        }
    }

    /// Reserve the next slot and return the advanced cursor.
    ///
    /// The cursor never lags `now`, so an idle bucket refills to (and not past)
    /// its single unit.
    pub fn take_unit(&mut self, now: Instant) -> Instant {
        let start = std::cmp::max(self.cursor, now);
        self.cursor = start + self.interval;
        self.cursor
    }

    /// Take a unit and decide whether the request is within limit.
    ///
    /// A request is admitted iff the returned cursor is no later than
    /// `now + interval`, i.e. its slot has already opened. Otherwise the
    /// `retry_after` hint is the wait after which a retry is admitted:
    /// under [`DenyPolicy::Reserve`] the denied request holds the slot ending at
    /// the new cursor, so the hint runs to that cursor; under
    /// [`DenyPolicy::Refund`] the slot is released and the hint runs to when it
    /// opens.
    pub fn process(&mut self, now: Instant, policy: DenyPolicy) -> ControlFlow<Reason> {
        let previous = self.cursor;
        let ready_at = self.take_unit(now);

        if ready_at <= now + self.interval {
            return ControlFlow::Continue(());
        }

        let retry_after = match policy {
            DenyPolicy::Reserve => ready_at.saturating_duration_since(now),
            DenyPolicy::Refund => {
                self.cursor = previous;
                previous.saturating_duration_since(now)
            }
        };

        ControlFlow::Break(Reason::RateLimited { retry_after })
    }

    pub fn ready_at(&self) -> Instant {
        self.cursor
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
