//! # Tower Visitor
//!
//! `tower-visitor` puts anonymous, per-visitor rate limiting in front of any
//! [Tower](https://github.com/tower-rs/tower) HTTP service.
//!
//! ## The Gate
//! [`VisitorLimitLayer`] wraps a shared [`visitor_limit::RequestGate`]. For every
//! request it:
//!
//! 1. **Identifies** the visitor from the `rate_limit_id` cookie, issuing a fresh
//!    random token (30 days, `HttpOnly`, `SameSite=Strict`) when there is none.
//! 2. **Paces** the visitor with their own burst-one token bucket.
//! 3. **Answers** over-limit requests itself with `429 Too Many Requests`, a
//!    `Retry-After` header and a JSON body
//!    `{ "error", "retry_after_ms", "message" }`. The inner service is not called.
//!
//! Admitted requests carry their [`visitor_limit::Identity`] in the request
//! extensions.
//!
//! Idle visitors are forgotten by the gate's [`visitor_limit::Reaper`], which the
//! application starts and stops:
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), visitor_limit::ConfigError> {
//! use tower_visitor::VisitorLimitLayer;
//! use visitor_limit::LimiterConfig;
//!
//! let layer = VisitorLimitLayer::from_config(LimiterConfig::from_env()?)?;
//! let reaper = layer.gate().reaper().start();
//! // ... serve with `layer` ...
//! reaper.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`GateError`].

mod cookie;
mod error;
mod layer;
mod service;

#[cfg(test)]
mod tests;

pub use cookie::HeaderJar;
pub use cookie::format_set_cookie;
pub use error::GateError;
pub use error::RateLimitBody;
pub use layer::VisitorLimitLayer;
pub use service::ResponseFuture;
pub use service::VisitorLimitService;
