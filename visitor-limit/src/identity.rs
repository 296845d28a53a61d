//! Anonymous visitor identities.
//!
//! An [`Identity`] is a bare random token. It distinguishes visitors for rate
//! limiting purposes only and carries no authentication meaning. The token lives
//! client-side, behind the [`TokenJar`] contract (a cookie in HTTP deployments).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tracing::debug;
use tracing::warn;

use crate::LimiterConfig;

const MAX_TOKEN_LEN: usize = 64;

/// Opaque token naming one anonymous visitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Mint a fresh identity: 128 bits from the thread-local CSPRNG, as 32 hex digits.
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    /// Accept a token presented by a client.
    ///
    /// Tokens minted elsewhere (UUIDs, for example) are accepted as long as they
    /// are short and made of `[A-Za-z0-9_-]`. Anything else reads as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_TOKEN_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cookie SameSite policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// How a persisted token is scoped and protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    pub max_age: Duration,
    pub path: String,
    pub http_only: bool,
    pub same_site: SameSite,
    pub secure: bool,
}

impl CookieAttributes {
    fn from_config(config: &LimiterConfig) -> Self {
        Self {
            max_age: config.cookie_max_age,
            path: "/".to_string(),
            http_only: true,
            same_site: SameSite::Strict,
            secure: config.cookie_secure,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JarError {
    /// The token or its attributes cannot be represented by the transport.
    #[error("identity token could not be encoded: {0}")]
    Encode(String),

    #[error("identity jar is not writable")]
    ReadOnly,
}

/// Client-side token storage, as seen from one request.
///
/// `set` stages a value; nothing reaches the client until `commit` succeeds.
pub trait TokenJar {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str, attributes: &CookieAttributes);

    fn commit(&mut self) -> Result<(), JarError>;
}

/// In-process [`TokenJar`], useful for non-HTTP embeddings and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryJar {
    stored: HashMap<String, (String, Option<CookieAttributes>)>,
    staged: Vec<(String, String, CookieAttributes)>,
    commits: usize,
}

impl MemoryJar {
    /// A jar that already holds `value` under `key`, as a returning client would.
    pub fn with_token(key: &str, value: &str) -> Self {
        let mut jar = Self::default();
        jar.stored
            .insert(key.to_string(), (value.to_string(), None));
        jar
    }

    /// Attributes the value under `key` was last committed with.
    pub fn attributes(&self, key: &str) -> Option<&CookieAttributes> {
        self.stored.get(key).and_then(|(_, attrs)| attrs.as_ref())
    }

    /// Number of commits that wrote at least one value.
    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl TokenJar for MemoryJar {
    fn get(&self, key: &str) -> Option<String> {
        self.stored.get(key).map(|(value, _)| value.clone())
    }

    fn set(&mut self, key: &str, value: &str, attributes: &CookieAttributes) {
        self.staged
            .push((key.to_string(), value.to_string(), attributes.clone()));
    }

    fn commit(&mut self) -> Result<(), JarError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        for (key, value, attributes) in self.staged.drain(..) {
            self.stored.insert(key, (value, Some(attributes)));
        }
        self.commits += 1;
        Ok(())
    }
}

/// Resolves the identity of a request, issuing one when the client has none.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    cookie_name: String,
    attributes: CookieAttributes,
    issued: Counter<u64>,
}

impl IdentityProvider {
    pub fn new(config: &LimiterConfig) -> Self {
        let meter = global::meter("visitor_limit");
        Self {
            cookie_name: config.cookie_name.clone(),
            attributes: CookieAttributes::from_config(config),
            issued: meter
                .u64_counter("visitor_limit.identities_issued")
                .build(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn attributes(&self) -> &CookieAttributes {
        &self.attributes
    }

    /// Read the visitor's token, or mint and persist a new one.
    ///
    /// A failed commit is not an error for the request: the fresh identity is
    /// still used, and the client will simply be issued another one next time.
    pub fn ensure_identity<J>(&self, jar: &mut J) -> Identity
    where
        J: TokenJar + ?Sized,
    {
        if let Some(identity) = jar
            .get(&self.cookie_name)
            .and_then(|raw| Identity::parse(&raw))
        {
            return identity;
        }

        let identity = Identity::generate();
        jar.set(&self.cookie_name, identity.as_str(), &self.attributes);
        match jar.commit() {
            Ok(()) => {
                self.issued.add(1, &[]);
                debug!(identity = %identity, "issued visitor identity");
            }
            Err(error) => {
                warn!(%error, "could not persist visitor identity; continuing without one");
            }
        }
        identity
    }
}
