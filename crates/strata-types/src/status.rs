//! Ingress-facing status vocabulary.
//!
//! Admission decisions and pipeline outcomes are expressed with the same
//! codes an HTTP ingress would answer with, so receivers can map them onto
//! their transport without a translation table of their own.

use serde::{Deserialize, Serialize};

/// Outcome status, named after the HTTP status it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// Accepted.
    Ok,
    /// Malformed or semantically invalid input.
    BadRequest,
    /// Missing or unknown tenant credential.
    Unauthorized,
    /// The tenant is not allowed to submit this data.
    Forbidden,
    /// The unit of work is larger than the collector accepts.
    RequestEntityTooLarge,
    /// Backpressure: the collector or the tenant is over its limit.
    TooManyRequests,
    /// Processing failed inside the collector.
    InternalError,
}

impl StatusCode {
    /// The numeric HTTP status for this code.
    pub fn as_http(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::RequestEntityTooLarge => 413,
            Self::TooManyRequests => 429,
            Self::InternalError => 500,
        }
    }

    /// Whether this code means the unit was accepted.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::BadRequest => "bad request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RequestEntityTooLarge => "request entity too large",
            Self::TooManyRequests => "too many requests",
            Self::InternalError => "internal error",
        };
        write!(f, "{} {}", self.as_http(), text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mapping() {
        assert_eq!(StatusCode::Ok.as_http(), 200);
        assert_eq!(StatusCode::BadRequest.as_http(), 400);
        assert_eq!(StatusCode::TooManyRequests.as_http(), 429);
        assert_eq!(StatusCode::InternalError.as_http(), 500);
    }

    #[test]
    fn display_includes_number() {
        assert_eq!(StatusCode::TooManyRequests.to_string(), "429 too many requests");
    }

    #[test]
    fn only_ok_is_ok() {
        assert!(StatusCode::Ok.is_ok());
        assert!(!StatusCode::Forbidden.is_ok());
    }
}
