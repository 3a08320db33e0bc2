//! OAuth 2.0 record and message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Redirect URI recorded for clients that registered without one.
pub const PLACEHOLDER_REDIRECT_URI: &str = "http://localhost/placeholder";

/// How a client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// Public client, no secret checked.
    None,
    /// Secret sent with HTTP Basic.
    #[default]
    ClientSecretBasic,
    /// Secret sent as `client_secret` form field.
    ClientSecretPost,
}

impl TokenEndpointAuthMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
        }
    }
}

/// A registered OAuth client. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub client_name: Option<String>,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    pub client_id_issued_at: DateTime<Utc>,
}

impl Client {
    /// Whether the token endpoint must check a secret for this client.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
            && self.token_endpoint_auth_method != TokenEndpointAuthMethod::None
    }
}

/// Client metadata submitted for explicit registration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientRegistration {
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: Option<TokenEndpointAuthMethod>,
}

/// Parameters of an authorization request, after HTTP-level parsing.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationParams {
    pub redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
}

/// An authorization request waiting for the user to log in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub redirect_uri_provided_explicitly: bool,
}

/// An authorization code issued after a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: Option<String>,
    /// Authenticated username.
    pub user: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub redirect_uri_provided_explicitly: bool,
}

/// A bearer token for API authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub user: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// A single-use token for obtaining a new token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub user: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub(crate) fn new(access: &AccessToken, refresh: &RefreshToken, now: DateTime<Utc>) -> Self {
        Self {
            access_token: access.token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: (access.expires_at - now).num_seconds(),
            refresh_token: refresh.token.clone(),
            scope: join_scopes(&access.scopes),
        }
    }
}

/// Split a space-delimited `scope` parameter.
#[must_use]
pub fn parse_scopes(scope: Option<&str>) -> Vec<String> {
    scope
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Join scopes into a `scope` parameter, `None` when empty.
#[must_use]
pub fn join_scopes(scopes: &[String]) -> Option<String> {
    if scopes.is_empty() { None } else { Some(scopes.join(" ")) }
}

const fn default_true() -> bool {
    true
}
