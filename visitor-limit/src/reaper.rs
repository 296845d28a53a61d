//! Background eviction of idle visitors.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use quanta::Clock;
use quanta::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::LimiterConfig;
use crate::LimiterStore;

/// Periodically removes store entries that have been idle too long.
#[derive(Debug, Clone)]
pub struct Reaper {
    store: Arc<LimiterStore>,
    clock: Clock,
    cleanup_interval: Duration,
    max_inactivity: Duration,
    evicted: Counter<u64>,
}

impl Reaper {
    pub fn new(store: Arc<LimiterStore>, clock: Clock, config: &LimiterConfig) -> Self {
        let meter = global::meter("visitor_limit");
        Self {
            store,
            clock,
            cleanup_interval: config.cleanup_interval,
            max_inactivity: config.max_inactivity,
            evicted: meter.u64_counter("visitor_limit.evicted").build(),
        }
    }

    /// Run one sweep at the current clock reading.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now())
    }

    /// Evict every entry idle for longer than `max_inactivity` as of `now`.
    ///
    /// Candidates are gathered shard by shard, then each is removed under its own
    /// lock after re-checking idleness, so an entry touched mid-sweep survives.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut candidates = Vec::new();
        self.store.for_each(|identity, entry| {
            if entry.is_idle(now, self.max_inactivity) {
                candidates.push(identity.clone());
            }
        });

        let evicted = candidates
            .iter()
            .filter(|identity| self.store.evict_if_idle(identity, now, self.max_inactivity))
            .count();

        self.evicted.add(evicted as u64, &[]);
        debug!(
            evicted,
            remaining = self.store.len(),
            "visitor limiter sweep complete"
        );
        evicted
    }

    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// The first sweep happens one `cleanup_interval` after start. The task runs
    /// until [`ReaperHandle::shutdown`] (or [`ReaperHandle::cancel`]) is called.
    pub fn start(self) -> ReaperHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            info!(
                cleanup_interval = ?self.cleanup_interval,
                max_inactivity = ?self.max_inactivity,
                "visitor limiter reaper started"
            );

            let period = self.cleanup_interval;
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = self.sweep();
                        if evicted > 0 {
                            info!(evicted, "evicted idle visitors");
                        }
                    }
                    _ = cancelled.cancelled() => {
                        info!("visitor limiter reaper shutting down");
                        break;
                    }
                }
            }
        });

        ReaperHandle { token, task }
    }
}

/// Owns a running reaper task.
#[derive(Debug)]
pub struct ReaperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the task to stop without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
