//! `Cookie` / `Set-Cookie` backed [`TokenJar`].

use http::HeaderMap;
use http::HeaderValue;
use http::header::COOKIE;
use visitor_limit::CookieAttributes;
use visitor_limit::JarError;
use visitor_limit::TokenJar;

/// Reads identity tokens from a request's `Cookie` headers and stages at most
/// one `Set-Cookie` value for the response.
#[derive(Debug)]
pub struct HeaderJar<'a> {
    headers: &'a HeaderMap,
    staged: Option<String>,
    committed: Option<HeaderValue>,
}

impl<'a> HeaderJar<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self {
            headers,
            staged: None,
            committed: None,
        }
    }

    /// The `Set-Cookie` value to attach to the response, if one was committed.
    pub fn into_set_cookie(self) -> Option<HeaderValue> {
        self.committed
    }
}

impl TokenJar for HeaderJar<'_> {
    fn get(&self, key: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.trim_matches('"').to_string())
    }

    fn set(&mut self, key: &str, value: &str, attributes: &CookieAttributes) {
        self.staged = Some(format_set_cookie(key, value, attributes));
    }

    fn commit(&mut self) -> Result<(), JarError> {
        let Some(staged) = self.staged.take() else {
            return Ok(());
        };
        let value = HeaderValue::from_str(&staged).map_err(|e| JarError::Encode(e.to_string()))?;
        self.committed = Some(value);
        Ok(())
    }
}

/// Render a `Set-Cookie` header value.
pub fn format_set_cookie(name: &str, value: &str, attributes: &CookieAttributes) -> String {
    let mut cookie = format!(
        "{name}={value}; Max-Age={}; Path={}",
        attributes.max_age.as_secs(),
        attributes.path
    );
    if attributes.http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie.push_str("; SameSite=");
    cookie.push_str(attributes.same_site.as_str());
    if attributes.secure {
        cookie.push_str("; Secure");
    }
    cookie
}
