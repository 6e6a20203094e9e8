//! Domain error taxonomy
//!
//! Every operation surfaces failures through [`ApiError`]. The presentation
//! layer maps each variant to the minimal client-visible `{status, message}`
//! pair; internal detail (query text, backend errors) is logged server-side
//! and never rendered to the client.

use crate::infrastructure::pubsub::BusError;
use crate::infrastructure::store::StoreError;
use thiserror::Error;

/// Failures surfaced by the toolkit's operations
#[derive(Debug, Error)]
pub enum ApiError {
    /// Quota exhausted for the current window. Client-visible, status 429.
    #[error("Rate limit exceeded. Limit is {limit} per {window_secs} seconds")]
    RateLimited { limit: u32, window_secs: u64 },

    /// Caller-supplied payload failed to parse. Client-visible, status 422;
    /// raised before any storage access.
    #[error("Invalid JSON: {0}")]
    MalformedInput(#[from] serde_json::Error),

    /// Requested sub-channel name failed the allow-list pattern.
    #[error("invalid channel name")]
    InvalidChannel,

    /// The identity resolver could not produce the required identity field.
    /// A server-side configuration fault, not a client error.
    #[error("identity field missing from request context: {0}")]
    IdentityMissing(&'static str),

    /// Key-value backend failure other than the recognized duplicate-key
    /// race (which is recovered internally and never reaches this type).
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// Message bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl ApiError {
    /// Whether this failure is the caller's fault (4xx) rather than ours
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. } | ApiError::MalformedInput(_) | ApiError::InvalidChannel
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_message_names_limit_and_window() {
        let err = ApiError::RateLimited {
            limit: 3,
            window_secs: 60,
        };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded. Limit is 3 per 60 seconds"
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn identity_missing_is_a_server_fault() {
        assert!(!ApiError::IdentityMissing("team id").is_client_error());
    }
}
