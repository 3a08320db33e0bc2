//! OAuth 2.0 authorization server.
//!
//! Users sign in with a username and password from a local credential file;
//! clients receive opaque bearer tokens backed by a JSON file on disk.
//!
//! ## Supported Standards
//! - RFC 6749: Authorization Code Grant, Refresh Token Grant
//! - RFC 7636: PKCE (S256)
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7009: Token Revocation
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 9728: OAuth Protected Resource Metadata

pub mod handlers;
pub mod login;
pub mod pkce;
pub mod policy;
pub mod provider;
pub mod store;
pub mod types;

pub use policy::{PermissiveRedirects, RedirectPolicy, RegisteredRedirects};
pub use provider::AuthorizationServer;
pub use store::{OAuthStore, StoreCounts, StoreState};
pub use types::{
    AccessToken, AuthorizationCode, AuthorizationParams, Client, ClientRegistration,
    PendingAuthorization, RefreshToken, TokenEndpointAuthMethod, TokenResponse,
};
