//! Redirect URI acceptance policies.

use std::sync::Arc;

use super::types::Client;
use crate::config::RedirectPolicyKind;

/// Decides whether a client may be redirected to a URI.
pub trait RedirectPolicy: Send + Sync + std::fmt::Debug {
    /// Policy name, for logs.
    fn name(&self) -> &'static str;

    /// Whether `redirect_uri` is acceptable for `client`.
    ///
    /// Called with syntactically valid absolute URIs only.
    fn allows(&self, client: &Client, redirect_uri: &str) -> bool;
}

/// Accepts any redirect URI.
///
/// Suitable when one operator owns every client; do not use for
/// multi-tenant deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveRedirects;

impl RedirectPolicy for PermissiveRedirects {
    fn name(&self) -> &'static str {
        "permissive"
    }

    fn allows(&self, _client: &Client, _redirect_uri: &str) -> bool {
        true
    }
}

/// Accepts only URIs the client registered, compared exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegisteredRedirects;

impl RedirectPolicy for RegisteredRedirects {
    fn name(&self) -> &'static str {
        "registered"
    }

    fn allows(&self, client: &Client, redirect_uri: &str) -> bool {
        client.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }
}

impl RedirectPolicyKind {
    /// Build the configured policy.
    #[must_use]
    pub fn build(self) -> Arc<dyn RedirectPolicy> {
        match self {
            Self::Permissive => Arc::new(PermissiveRedirects),
            Self::Registered => Arc::new(RegisteredRedirects),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::server::oauth::types::TokenEndpointAuthMethod;

    fn client() -> Client {
        Client {
            client_id: "test".into(),
            client_secret: None,
            redirect_uris: vec!["http://placeholder/cb".into()],
            client_name: None,
            token_endpoint_auth_method: TokenEndpointAuthMethod::None,
            client_id_issued_at: Utc::now(),
        }
    }

    #[test]
    fn test_permissive_accepts_any_redirect() {
        let policy = PermissiveRedirects;
        for uri in [
            "http://localhost:8080/callback",
            "https://example.com/oauth/callback",
            "myapp://callback",
            "http://127.0.0.1:3000/auth",
        ] {
            assert!(policy.allows(&client(), uri), "{uri} rejected");
        }
    }

    #[test]
    fn test_registered_requires_exact_match() {
        let policy = RegisteredRedirects;
        assert!(policy.allows(&client(), "http://placeholder/cb"));
        assert!(!policy.allows(&client(), "http://placeholder/cb/"));
        assert!(!policy.allows(&client(), "https://evil.example.com/cb"));
    }

    #[test]
    fn test_kind_builds_named_policy() {
        assert_eq!(RedirectPolicyKind::Permissive.build().name(), "permissive");
        assert_eq!(RedirectPolicyKind::Registered.build().name(), "registered");
    }
}
