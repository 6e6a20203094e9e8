//! Request identity resolution
//!
//! Identity extraction is a pure function of the request's handshake
//! context. It runs eagerly at the start of request handling and the result
//! is threaded explicitly through everything that needs it; components that
//! require a field the resolver could not produce fail fast with
//! [`ApiError::IdentityMissing`], which is distinct from a rate-limit
//! rejection.

use crate::domain::errors::ApiError;
use axum::http::HeaderMap;

/// The identities resolved from one request or connection handshake.
///
/// Fields the resolver could not determine are `None`; the accessors convert
/// absence into the fail-fast error at the point a component actually
/// requires the field.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity {
    team_id: Option<String>,
    session_id: Option<String>,
}

impl RequestIdentity {
    pub fn new(team_id: Option<String>, session_id: Option<String>) -> Self {
        Self {
            team_id,
            session_id,
        }
    }

    pub fn team_id(&self) -> Result<&str, ApiError> {
        self.team_id
            .as_deref()
            .ok_or(ApiError::IdentityMissing("team id"))
    }

    pub fn session_id(&self) -> Result<&str, ApiError> {
        self.session_id
            .as_deref()
            .ok_or(ApiError::IdentityMissing("session id"))
    }
}

/// Maps a request's handshake context to its identities.
///
/// Supplied by the embedding application; deriving a team from real
/// credentials is deliberately outside this crate.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> RequestIdentity;
}

/// Header-based resolver for development and tests.
///
/// Reads `x-team-id` and `x-session-id`, falling back to a configured
/// default team when the header is absent.
pub struct HeaderIdentityResolver {
    default_team: Option<String>,
}

impl HeaderIdentityResolver {
    pub fn new(default_team: Option<String>) -> Self {
        Self { default_team }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl IdentityResolver for HeaderIdentityResolver {
    fn resolve(&self, headers: &HeaderMap) -> RequestIdentity {
        let team_id = header_value(headers, "x-team-id").or_else(|| self.default_team.clone());
        let session_id = header_value(headers, "x-session-id");
        RequestIdentity::new(team_id, session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_headers_when_present() {
        let resolver = HeaderIdentityResolver::new(Some("fallback".into()));
        let mut headers = HeaderMap::new();
        headers.insert("x-team-id", "team-42".parse().unwrap());
        headers.insert("x-session-id", "abc123".parse().unwrap());

        let identity = resolver.resolve(&headers);
        assert_eq!(identity.team_id().unwrap(), "team-42");
        assert_eq!(identity.session_id().unwrap(), "abc123");
    }

    #[test]
    fn falls_back_to_default_team() {
        let resolver = HeaderIdentityResolver::new(Some("test-team".into()));
        let identity = resolver.resolve(&HeaderMap::new());
        assert_eq!(identity.team_id().unwrap(), "test-team");
    }

    #[test]
    fn missing_session_fails_fast_on_access() {
        let resolver = HeaderIdentityResolver::new(None);
        let identity = resolver.resolve(&HeaderMap::new());
        assert!(matches!(
            identity.team_id(),
            Err(ApiError::IdentityMissing("team id"))
        ));
        assert!(matches!(
            identity.session_id(),
            Err(ApiError::IdentityMissing("session id"))
        ));
    }
}
