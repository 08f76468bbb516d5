use allocation::AllocationError;
use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

/// Everything a view can fail with. Cloneable so a coalesced request can hand
/// the same failure to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    UnknownStrategy(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("session expired or invalid: {0}")]
    Auth(String),
    #[error("not allowed: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("too many attempts; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl ClientError {
    /// Maps a non-2xx response to a typed error. `body` is the decoded
    /// [`ApiError`] when the server sent one.
    pub fn from_response(status: u16, body: Option<ApiError>, retry_after: Option<u64>) -> Self {
        let message = body
            .as_ref()
            .map(|err| err.message.clone())
            .unwrap_or_else(|| format!("HTTP {status}"));
        match status {
            400 if body.as_ref().map(|err| err.code) == Some(ErrorCode::UnknownStrategy) => {
                Self::UnknownStrategy(message)
            }
            400 => Self::Validation(message),
            401 => Self::Auth(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            429 => Self::RateLimited {
                retry_after_secs: retry_after
                    .or_else(|| body.and_then(|err| err.retry_after_secs))
                    .unwrap_or(1),
            },
            _ => Self::Api { status, message },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<AllocationError> for ClientError {
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::Validation(message) => Self::Validation(message),
            AllocationError::UnknownStrategy(_) => Self::UnknownStrategy(value.to_string()),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_splits_on_error_code() {
        let unknown = ApiError::new(ErrorCode::UnknownStrategy, "unknown distribution strategy 'x'");
        assert!(matches!(
            ClientError::from_response(400, Some(unknown), None),
            ClientError::UnknownStrategy(_)
        ));
        assert!(matches!(
            ClientError::from_response(400, Some(ApiError::validation("bad")), None),
            ClientError::Validation(message) if message == "bad"
        ));
    }

    #[test]
    fn rate_limit_prefers_header_then_body() {
        let body = ApiError::rate_limited(30);
        assert_eq!(
            ClientError::from_response(429, Some(body.clone()), Some(12)),
            ClientError::RateLimited { retry_after_secs: 12 }
        );
        assert_eq!(
            ClientError::from_response(429, Some(body), None),
            ClientError::RateLimited { retry_after_secs: 30 }
        );
    }

    #[test]
    fn unknown_statuses_keep_the_code() {
        assert_eq!(
            ClientError::from_response(502, None, None),
            ClientError::Api {
                status: 502,
                message: "HTTP 502".into()
            }
        );
    }
}
