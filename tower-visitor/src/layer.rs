use std::sync::Arc;

use tower::Layer;
use visitor_limit::ConfigError;
use visitor_limit::LimiterConfig;
use visitor_limit::RequestGate;

use crate::service::VisitorLimitService;

/// Applies per-visitor rate limiting to requests.
///
/// Every service produced by one layer shares the same [`RequestGate`], so
/// clones of the stack see the same visitors.
#[derive(Debug, Clone)]
pub struct VisitorLimitLayer {
    gate: Arc<RequestGate>,
}

impl VisitorLimitLayer {
    /// Create a VisitorLimitLayer around an existing gate.
    pub fn new(gate: Arc<RequestGate>) -> Self {
        Self { gate }
    }

    /// Build a gate from `config` and wrap it.
    pub fn from_config(config: LimiterConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(Arc::new(RequestGate::new(config)?)))
    }

    /// The shared gate, e.g. to start its [`Reaper`](visitor_limit::Reaper).
    pub fn gate(&self) -> &Arc<RequestGate> {
        &self.gate
    }
}

impl<S> Layer<S> for VisitorLimitLayer {
    type Service = VisitorLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        VisitorLimitService::new(service, self.gate.clone())
    }
}
