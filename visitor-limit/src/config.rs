//! Configuration for per-visitor rate limiting.
//!
//! Every field has a default, so an empty document deserializes to the stock
//! policy: one request every 2 seconds, idle visitors forgotten after an hour,
//! swept every 30 minutes. Durations are written in `humantime` form (`"2s"`,
//! `"30m"`, `"30days"`).

use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;

use crate::DenyPolicy;

const ENV_REFILL_INTERVAL: &str = "VISITOR_LIMIT_REFILL_INTERVAL";
const ENV_CLEANUP_INTERVAL: &str = "VISITOR_LIMIT_CLEANUP_INTERVAL";
const ENV_MAX_INACTIVITY: &str = "VISITOR_LIMIT_MAX_INACTIVITY";
const ENV_COOKIE_NAME: &str = "VISITOR_LIMIT_COOKIE_NAME";
const ENV_DENY_POLICY: &str = "VISITOR_LIMIT_DENY_POLICY";

/// Errors produced while loading or validating a [`LimiterConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("invalid cookie name {0:?}")]
    InvalidCookieName(String),

    #[error("invalid duration {value:?} in {var}: {source}")]
    InvalidDuration {
        var: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("invalid deny policy {0:?}; expected \"reserve\" or \"refund\"")]
    InvalidDenyPolicy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// One unit is replenished every `refill_interval`.
    #[serde(deserialize_with = "human_duration")]
    pub refill_interval: Duration,

    /// How often the reaper sweeps the store.
    #[serde(deserialize_with = "human_duration")]
    pub cleanup_interval: Duration,

    /// Entries idle for longer than this are evicted.
    #[serde(deserialize_with = "human_duration")]
    pub max_inactivity: Duration,

    pub cookie_name: String,

    #[serde(deserialize_with = "human_duration")]
    pub cookie_max_age: Duration,

    /// Mark the identity cookie `Secure`. Only enable behind HTTPS.
    pub cookie_secure: bool,

    pub deny_policy: DenyPolicy,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            refill_interval: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(30 * 60),
            max_inactivity: Duration::from_secs(60 * 60),
            cookie_name: "rate_limit_id".to_string(),
            cookie_max_age: Duration::from_secs(30 * 24 * 3600),
            cookie_secure: false,
            deny_policy: DenyPolicy::Reserve,
        }
    }
}

impl LimiterConfig {
    /// Defaults overridden by any `VISITOR_LIMIT_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let duration = |var: &'static str| -> Result<Option<Duration>, ConfigError> {
            lookup(var)
                .map(|value| {
                    humantime::parse_duration(&value).map_err(|source| {
                        ConfigError::InvalidDuration { var, value, source }
                    })
                })
                .transpose()
        };

        if let Some(d) = duration(ENV_REFILL_INTERVAL)? {
            config.refill_interval = d;
        }
        if let Some(d) = duration(ENV_CLEANUP_INTERVAL)? {
            config.cleanup_interval = d;
        }
        if let Some(d) = duration(ENV_MAX_INACTIVITY)? {
            config.max_inactivity = d;
        }
        if let Some(name) = lookup(ENV_COOKIE_NAME) {
            config.cookie_name = name;
        }
        if let Some(policy) = lookup(ENV_DENY_POLICY) {
            config.deny_policy = match policy.to_ascii_lowercase().as_str() {
                "reserve" => DenyPolicy::Reserve,
                "refund" => DenyPolicy::Refund,
                _ => return Err(ConfigError::InvalidDenyPolicy(policy)),
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("refill_interval", self.refill_interval),
            ("cleanup_interval", self.cleanup_interval),
            ("max_inactivity", self.max_inactivity),
            ("cookie_max_age", self.cookie_max_age),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if !is_cookie_token(&self.cookie_name) {
            return Err(ConfigError::InvalidCookieName(self.cookie_name.clone()));
        }

        Ok(())
    }

    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_max_inactivity(mut self, max_inactivity: Duration) -> Self {
        self.max_inactivity = max_inactivity;
        self
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn with_deny_policy(mut self, policy: DenyPolicy) -> Self {
        self.deny_policy = policy;
        self
    }
}

// RFC 6265 cookie-name: an RFC 2616 token.
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
        })
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_stock_policy() {
        let config = LimiterConfig::default();
        assert_eq!(config.refill_interval, Duration::from_secs(2));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1800));
        assert_eq!(config.max_inactivity, Duration::from_secs(3600));
        assert_eq!(config.cookie_max_age, Duration::from_secs(2_592_000));
        assert_eq!(config.cookie_name, "rate_limit_id");
        assert_eq!(config.deny_policy, DenyPolicy::Reserve);
        config.validate().unwrap();
    }

    #[test]
    fn deserializes_human_durations() {
        let config: LimiterConfig = serde_json::from_str(
            r#"{ "refill_interval": "500ms", "max_inactivity": "2h", "deny_policy": "refund" }"#,
        )
        .unwrap();

        assert_eq!(config.refill_interval, Duration::from_millis(500));
        assert_eq!(config.max_inactivity, Duration::from_secs(7200));
        assert_eq!(config.deny_policy, DenyPolicy::Refund);
        // Untouched fields keep their defaults.
        assert_eq!(config.cleanup_interval, Duration::from_secs(1800));
    }

    #[test]
    fn rejects_malformed_durations_in_documents() {
        let err = serde_json::from_str::<LimiterConfig>(r#"{ "refill_interval": "soon" }"#);
        assert!(err.is_err());
    }

    #[test]
    fn env_overrides_are_applied_and_validated() {
        let vars: HashMap<&str, &str> = [
            (ENV_REFILL_INTERVAL, "1s"),
            (ENV_COOKIE_NAME, "visitor"),
            (ENV_DENY_POLICY, "Refund"),
        ]
        .into_iter()
        .collect();

        let config =
            LimiterConfig::from_lookup(|var| vars.get(var).map(|v| v.to_string())).unwrap();
        assert_eq!(config.refill_interval, Duration::from_secs(1));
        assert_eq!(config.cookie_name, "visitor");
        assert_eq!(config.deny_policy, DenyPolicy::Refund);
    }

    #[test]
    fn env_errors_name_the_variable() {
        let err = LimiterConfig::from_lookup(|var| {
            (var == ENV_MAX_INACTIVITY).then(|| "forever".to_string())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { var: ENV_MAX_INACTIVITY, .. }
        ));

        let err = LimiterConfig::from_lookup(|var| {
            (var == ENV_DENY_POLICY).then(|| "queue".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDenyPolicy(_)));
    }

    #[test]
    fn validate_rejects_zero_intervals_and_bad_names() {
        let zero = LimiterConfig::default().with_refill_interval(Duration::ZERO);
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::ZeroDuration("refill_interval"))
        ));

        for name in ["", "rate limit", "id;x", "a=b"] {
            let config = LimiterConfig::default().with_cookie_name(name);
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidCookieName(_))),
                "{name:?} should be rejected"
            );
        }
    }
}
