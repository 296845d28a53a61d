//! Per-request orchestration: identity, pacing and the admit/deny decision.

use std::ops::ControlFlow;
use std::sync::Arc;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use quanta::Clock;
use quanta::Instant;
use tracing::debug;

use crate::ConfigError;
use crate::DenyPolicy;
use crate::Identity;
use crate::IdentityProvider;
use crate::LimiterConfig;
use crate::LimiterStore;
use crate::Reaper;
use crate::Reason;
use crate::TokenJar;

/// Result of gating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub identity: Identity,
    pub decision: ControlFlow<Reason>,
}

#[derive(Clone, Debug)]
struct GateMetrics {
    admitted: Counter<u64>,
    denied: Counter<u64>,
}

/// Decides, per request, whether a visitor may proceed.
///
/// Owns the [`LimiterStore`]; a [`Reaper`] built with [`RequestGate::reaper`]
/// shares it.
#[derive(Debug)]
pub struct RequestGate {
    store: Arc<LimiterStore>,
    identities: IdentityProvider,
    clock: Clock,
    config: LimiterConfig,
    instruments: GateMetrics,
}

impl RequestGate {
    pub fn new(config: LimiterConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Clock::new())
    }

    /// Build a gate reading time from `clock` (e.g. `quanta::Clock::mock()`).
    pub fn with_clock(config: LimiterConfig, clock: Clock) -> Result<Self, ConfigError> {
        config.validate()?;

        let meter = global::meter("visitor_limit");
        let instruments = GateMetrics {
            admitted: meter.u64_counter("visitor_limit.admitted").build(),
            denied: meter.u64_counter("visitor_limit.denied").build(),
        };

        Ok(Self {
            store: Arc::new(LimiterStore::new(config.refill_interval)),
            identities: IdentityProvider::new(&config),
            clock,
            config,
            instruments,
        })
    }

    /// Resolve the visitor behind `jar` and pace them.
    pub fn check<J>(&self, jar: &mut J) -> GateOutcome
    where
        J: TokenJar + ?Sized,
    {
        let identity = self.identities.ensure_identity(jar);
        let decision = self.evaluate(&identity);
        GateOutcome { identity, decision }
    }

    pub fn evaluate(&self, identity: &Identity) -> ControlFlow<Reason> {
        self.evaluate_at(identity, self.clock.now())
    }

    /// Touch the visitor's entry and take a unit from it, as one atomic update.
    ///
    /// The entry is written back whatever the outcome: under
    /// [`DenyPolicy::Reserve`] a denied request still consumes its slot.
    pub fn evaluate_at(&self, identity: &Identity, now: Instant) -> ControlFlow<Reason> {
        let policy = self.config.deny_policy;
        let decision = self.store.update(identity, now, |entry| {
            entry.touch(now);
            entry.limiter.process(now, policy)
        });

        match decision {
            ControlFlow::Continue(()) => {
                self.instruments.admitted.add(1, &[]);
                debug!(identity = %identity, "visitor admitted");
            }
            ControlFlow::Break(Reason::RateLimited { retry_after }) => {
                self.instruments.denied.add(1, &[]);
                debug!(identity = %identity, ?retry_after, "visitor rate limited");
            }
        }
        decision
    }

    /// A reaper sharing this gate's store, clock and configuration.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(self.store.clone(), self.clock.clone(), &self.config)
    }

    pub fn store(&self) -> &Arc<LimiterStore> {
        &self.store
    }

    pub fn identities(&self) -> &IdentityProvider {
        &self.identities
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }
}
