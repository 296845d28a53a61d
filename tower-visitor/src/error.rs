use std::time::Duration;

use http::HeaderValue;
use http::Response;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use http::header::RETRY_AFTER;
use serde::Deserialize;
use serde::Serialize;

/// Errors produced by the visitor gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The visitor exceeded their rate.
    ///
    /// Rendered as `429 Too Many Requests` with a `Retry-After` header and a
    /// [`RateLimitBody`] JSON document.
    #[error("Rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// Advisory wait before the next attempt.
        retry_after: Duration,
    },
}

/// JSON body returned with a 429.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBody {
    pub error: String,
    pub retry_after_ms: u64,
    pub message: String,
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn body(&self) -> RateLimitBody {
        match self {
            Self::RateLimited { retry_after } => {
                let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                RateLimitBody {
                    error: "Rate limit exceeded".to_string(),
                    retry_after_ms,
                    message: format!(
                        "Please try again in {:?}.",
                        Duration::from_millis(retry_after_ms)
                    ),
                }
            }
        }
    }

    /// Build the HTTP response for this error over any body type.
    pub fn to_response<B>(&self) -> Response<B>
    where
        B: From<String>,
    {
        let body = serde_json::to_string(&self.body()).unwrap_or_default();
        let mut response = Response::new(B::from(body));
        *response.status_mut() = self.status();

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match self {
            Self::RateLimited { retry_after } => {
                // Whole seconds, rounded up, never zero.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                headers.insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
            }
        }
        response
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        self.to_response::<axum::body::Body>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_429_with_structured_body() {
        let err = GateError::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        let response = err.to_response::<String>();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "2");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let body: RateLimitBody = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body.retry_after_ms, 1500);
        assert_eq!(body.error, "Rate limit exceeded");
        assert_eq!(body.message, "Please try again in 1.5s.");
    }

    #[test]
    fn retry_after_header_is_at_least_one_second() {
        let err = GateError::RateLimited {
            retry_after: Duration::from_millis(20),
        };
        let response = err.to_response::<String>();
        assert_eq!(response.headers()[RETRY_AFTER], "1");

        let body: RateLimitBody = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body.message, "Please try again in 20ms.");
    }

    #[test]
    fn whole_seconds_are_not_rounded_up() {
        let err = GateError::RateLimited {
            retry_after: Duration::from_secs(4),
        };
        let response = err.to_response::<String>();
        assert_eq!(response.headers()[RETRY_AFTER], "4");
    }
}
