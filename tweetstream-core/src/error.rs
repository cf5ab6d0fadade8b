//! Error taxonomy: HTTP status (plus structured error body) to a single tagged error value.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::headers::Headers;
use crate::rate_limit::{unix_now, RateLimit};

/// Closed set of error kinds. Dispatch on this, not on type identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    /// 403 refined: the status text duplicates a recent one.
    DuplicateStatus,
    /// 403 refined: already favorited.
    AlreadyFavorited,
    /// 403 refined: already retweeted.
    AlreadyRetweeted,
    NotFound,
    NotAcceptable,
    RequestEntityTooLarge,
    TooManyRequests,
    UnprocessableEntity,
    InternalServerError,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    /// Any other 4xx.
    ClientError,
    /// Any other 5xx.
    ServerError,
}

/// Message phrases used to refine a 403. Best effort: the platform may reword them.
const FORBIDDEN_PHRASES: &[(&str, ErrorKind)] = &[
    ("Status is a duplicate.", ErrorKind::DuplicateStatus),
    (
        "You have already favorited this status.",
        ErrorKind::AlreadyFavorited,
    ),
    (
        "You have already retweeted this Tweet.",
        ErrorKind::AlreadyRetweeted,
    ),
    (
        "sharing is not permissible for this status (Share validations failed)",
        ErrorKind::AlreadyRetweeted,
    ),
];

impl ErrorKind {
    /// Kind for an error status; `None` for anything below 400 or above 599.
    pub fn from_status(status: u16) -> Option<Self> {
        let kind = match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            406 => Self::NotAcceptable,
            413 => Self::RequestEntityTooLarge,
            420 | 429 => Self::TooManyRequests,
            422 => Self::UnprocessableEntity,
            500 => Self::InternalServerError,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => return None,
        };
        Some(kind)
    }

    /// Refine `Forbidden` by message text; other kinds are returned unchanged.
    pub fn refine(self, message: &str) -> Self {
        if self != Self::Forbidden {
            return self;
        }
        FORBIDDEN_PHRASES
            .iter()
            .find(|(phrase, _)| message.contains(phrase))
            .map(|(_, kind)| *kind)
            .unwrap_or(self)
    }

    pub fn is_client_error(self) -> bool {
        !self.is_server_error()
    }

    pub fn is_server_error(self) -> bool {
        matches!(
            self,
            Self::InternalServerError
                | Self::BadGateway
                | Self::ServiceUnavailable
                | Self::GatewayTimeout
                | Self::ServerError
        )
    }
}

/// Error returned by the platform for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind:?} (HTTP {status}): {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: u16,
    /// Human-readable text from the body; may be empty.
    pub message: String,
    /// Platform-specific numeric error code, when the body has one.
    pub code: Option<u32>,
    pub rate_limit: Option<RateLimit>,
    /// Recommended wait before retrying; set for `TooManyRequests`.
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Map a response to an error. `None` when `status` is not an error status (below 400).
pub fn map_status(status: u16, headers: &Headers, body: &[u8]) -> Option<ApiError> {
    map_status_at(status, headers, body, unix_now())
}

/// As [`map_status`] with an explicit clock (unix seconds).
pub fn map_status_at(status: u16, headers: &Headers, body: &[u8], now: u64) -> Option<ApiError> {
    let kind = ErrorKind::from_status(status)?;
    let (message, code) = parse_error_body(body);
    let kind = kind.refine(&message);
    let rate_limit = RateLimit::from_headers(headers);
    let retry_after = if kind == ErrorKind::TooManyRequests {
        rate_limit
            .and_then(|rl| rl.retry_after_at(now))
            .or_else(|| headers.parse::<u64>("retry-after").map(Duration::from_secs))
    } else {
        None
    };
    Some(ApiError {
        kind,
        status,
        message,
        code,
        rate_limit,
        retry_after,
    })
}

/// Extract (message, code) from `{"error": ".."}`, `{"errors": [{"message": .., "code": ..}]}`
/// or `{"errors": ".."}`. Non-JSON bodies become the trimmed text.
fn parse_error_body(body: &[u8]) -> (String, Option<u32>) {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return (String::from_utf8_lossy(body).trim().to_string(), None),
    };
    if let Some(msg) = value.get("error").and_then(Value::as_str) {
        return (msg.to_string(), None);
    }
    match value.get("errors") {
        Some(Value::Array(errors)) => match errors.first() {
            Some(Value::Object(first)) => {
                let message = first
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let code = first
                    .get("code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u32::try_from(c).ok());
                (message, code)
            }
            Some(Value::String(s)) => (s.clone(), None),
            _ => (String::new(), None),
        },
        Some(Value::String(s)) => (s.clone(), None),
        _ => (String::new(), None),
    }
}
