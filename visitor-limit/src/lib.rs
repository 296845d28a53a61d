//! # visitor-limit
//!
//! `visitor-limit` rate limits anonymous visitors. Every client is given a durable,
//! unauthenticated [`Identity`] (a random token persisted client-side), and each
//! identity is paced by its own burst-one token bucket.
//!
//! ## Key Concepts
//!
//! * **Virtual-time cursor**: a [`VirtualCursor`] replaces the counted bucket with a
//!   single timestamp, advanced by one refill interval per unit taken.
//! * **Keyed store**: [`LimiterStore`] maps identities to entries on a sharded map.
//!   Mutations of one identity are serialized; different identities never wait on
//!   one another.
//! * **Fail-open lifecycle**: entries are created lazily and evicted by the
//!   [`Reaper`] once idle. A missing entry is indistinguishable from a new visitor.
//! * **Request gate**: [`RequestGate`] ties identity resolution and pacing together
//!   for a single inbound request.
//!
//! ## Example
//!
//! ```rust
//! use visitor_limit::LimiterConfig;
//! use visitor_limit::MemoryJar;
//! use visitor_limit::RequestGate;
//!
//! let gate = RequestGate::new(LimiterConfig::default()).unwrap();
//! let mut jar = MemoryJar::default();
//!
//! let first = gate.check(&mut jar);
//! assert!(first.decision.is_continue());
//!
//! // The jar now remembers the visitor, and the burst is spent.
//! let second = gate.check(&mut jar);
//! assert_eq!(first.identity, second.identity);
//! assert!(second.decision.is_break());
//! ```

use std::time::Duration;

mod config;
mod cursor;
mod gate;
mod identity;
mod reaper;
mod store;

pub use config::ConfigError;
pub use config::LimiterConfig;
pub use cursor::DenyPolicy;
pub use cursor::VirtualCursor;
pub use gate::GateOutcome;
pub use gate::RequestGate;
pub use identity::CookieAttributes;
pub use identity::Identity;
pub use identity::IdentityProvider;
pub use identity::JarError;
pub use identity::MemoryJar;
pub use identity::SameSite;
pub use identity::TokenJar;
pub use reaper::Reaper;
pub use reaper::ReaperHandle;
pub use store::LimiterEntry;
pub use store::LimiterStore;

/// Reasons why a request might be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    RateLimited { retry_after: Duration },
}
