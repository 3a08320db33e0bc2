//! The authorization server state machine.
//!
//! Flow: `authorize` parks a [`PendingAuthorization`] and sends the user to
//! the login page; `complete_login` turns it into an [`AuthorizationCode`];
//! the token endpoint exchanges the code for an access/refresh pair, and
//! refresh tokens rotate on every use.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use url::Url;

use super::pkce;
use super::policy::RedirectPolicy;
use super::store::{OAuthStore, Transaction};
use super::types::{
    AccessToken, AuthorizationCode, AuthorizationParams, Client, ClientRegistration,
    PLACEHOLDER_REDIRECT_URI, PendingAuthorization, RefreshToken, TokenEndpointAuthMethod,
    TokenResponse,
};
use crate::config::{Config, TokenLifetimes};
use crate::credentials::CredentialVerifier;
use crate::error::{OAuthError, OAuthResult};

/// Generate an opaque token: prefix plus two UUIDs (256 bits).
fn generate_token(prefix: &str) -> String {
    format!("{prefix}{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
}

/// OAuth authorization server backed by a persistent store.
pub struct AuthorizationServer {
    store: Arc<OAuthStore>,
    verifier: Arc<dyn CredentialVerifier>,
    redirect_policy: Arc<dyn RedirectPolicy>,
    lifetimes: TokenLifetimes,
    base_url: String,
    login_url: String,
}

impl AuthorizationServer {
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<OAuthStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            store,
            verifier,
            redirect_policy: config.redirect_policy.build(),
            lifetimes: config.lifetimes,
            base_url: config.base_url.clone(),
            login_url: config.login_url(),
        }
    }

    /// Replace the redirect policy.
    #[must_use]
    pub fn with_redirect_policy(mut self, policy: Arc<dyn RedirectPolicy>) -> Self {
        self.redirect_policy = policy;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<OAuthStore> {
        &self.store
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ─── Clients ─────────────────────────────────────────────────────────────

    /// Look up a client, auto-registering a public client for unknown ids.
    pub async fn get_client(&self, client_id: &str) -> OAuthResult<Client> {
        if client_id.is_empty() {
            return Err(OAuthError::invalid_client("client_id is required"));
        }

        let client = self
            .store
            .transaction(|tx| {
                if let Some(existing) = tx.get::<Client>(client_id) {
                    return Ok::<_, OAuthError>(existing.clone());
                }
                let client = Client {
                    client_id: client_id.to_owned(),
                    client_secret: None,
                    redirect_uris: vec![PLACEHOLDER_REDIRECT_URI.to_string()],
                    client_name: None,
                    token_endpoint_auth_method: TokenEndpointAuthMethod::None,
                    client_id_issued_at: tx.now(),
                };
                tracing::info!(client_id = %client_id, "Auto-registered OAuth client");
                tx.insert(client_id, client.clone());
                Ok(client)
            })
            .await?;

        Ok(client)
    }

    /// Look up a client without registering it.
    pub async fn find_client(&self, client_id: &str) -> Option<Client> {
        self.store.get::<Client>(client_id).await
    }

    /// Register a client explicitly. The returned record carries the only
    /// copy of the secret that is ever shown.
    pub async fn register_client(&self, registration: ClientRegistration) -> OAuthResult<Client> {
        for uri in &registration.redirect_uris {
            parse_redirect_uri(uri)?;
        }

        let client_id = registration
            .client_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_token("client_"));
        let redirect_uris = if registration.redirect_uris.is_empty() {
            vec![PLACEHOLDER_REDIRECT_URI.to_string()]
        } else {
            registration.redirect_uris
        };

        let client = self
            .store
            .transaction(|tx| {
                if tx.get::<Client>(&client_id).is_some() {
                    return Err(OAuthError::InvalidClientMetadata(format!(
                        "client_id '{client_id}' is already registered"
                    )));
                }
                let client = Client {
                    client_id: client_id.clone(),
                    client_secret: Some(generate_token("secret_")),
                    redirect_uris,
                    client_name: registration.client_name,
                    token_endpoint_auth_method: registration
                        .token_endpoint_auth_method
                        .unwrap_or_default(),
                    client_id_issued_at: tx.now(),
                };
                tx.insert(client_id.clone(), client.clone());
                Ok(client)
            })
            .await?;

        tracing::info!(client_id = %client.client_id, "Registered OAuth client");
        Ok(client)
    }

    /// Check token endpoint client authentication.
    ///
    /// Public clients pass without a secret; confidential clients must present
    /// the registered one.
    pub fn authenticate_client(&self, client: &Client, secret: Option<&str>) -> OAuthResult<()> {
        if !client.is_confidential() {
            return Ok(());
        }
        match (client.client_secret.as_deref(), secret) {
            (Some(expected), Some(given))
                if bool::from(expected.as_bytes().ct_eq(given.as_bytes())) =>
            {
                Ok(())
            }
            _ => Err(OAuthError::invalid_client("Client authentication failed")),
        }
    }

    // ─── Authorization ───────────────────────────────────────────────────────

    /// Start an authorization: park the request and return the login URL.
    pub async fn authorize(
        &self,
        client: &Client,
        params: AuthorizationParams,
    ) -> OAuthResult<String> {
        let (redirect_uri, provided_explicitly) =
            self.resolve_redirect_uri(client, params.redirect_uri.as_deref())?;

        let pending_id = generate_token("pending_");
        let pending_lifetime = self.lifetimes.pending_authorization;
        self.store
            .transaction(|tx| {
                let pending = PendingAuthorization {
                    id: pending_id.clone(),
                    client_id: client.client_id.clone(),
                    redirect_uri,
                    scopes: params.scopes,
                    state: params.state,
                    code_challenge: params.code_challenge,
                    expires_at: tx.now() + pending_lifetime,
                    redirect_uri_provided_explicitly: provided_explicitly,
                };
                tx.insert(pending_id.clone(), pending);
                Ok::<_, OAuthError>(())
            })
            .await?;

        tracing::debug!(client_id = %client.client_id, "Created pending authorization");
        Ok(format!("{}?pending={pending_id}", self.login_url))
    }

    /// Pick the redirect URI for a request and check it against the policy.
    ///
    /// Returns the URI and whether the client sent it explicitly.
    pub fn resolve_redirect_uri(
        &self,
        client: &Client,
        requested: Option<&str>,
    ) -> OAuthResult<(String, bool)> {
        let (uri, explicit) = match requested {
            Some(uri) => (uri.to_owned(), true),
            None => match client.redirect_uris.as_slice() {
                [only] => (only.clone(), false),
                _ => {
                    return Err(OAuthError::invalid_request(
                        "redirect_uri is required when the client has several registered",
                    ));
                }
            },
        };

        parse_redirect_uri(&uri)?;
        if !self.redirect_policy.allows(client, &uri) {
            return Err(OAuthError::invalid_request(
                "redirect_uri is not allowed for this client",
            ));
        }
        Ok((uri, explicit))
    }

    /// Look up a pending authorization (for rendering the login page).
    pub async fn load_pending_authorization(&self, pending_id: &str) -> Option<PendingAuthorization> {
        self.store.get::<PendingAuthorization>(pending_id).await
    }

    /// Finish the login step.
    ///
    /// Bad credentials leave the pending authorization untouched. Good
    /// credentials consume it and mint an authorization code; the return value
    /// is the client redirect URL carrying `code` and `state`.
    pub async fn complete_login(
        &self,
        pending_id: &str,
        username: &str,
        password: &str,
    ) -> OAuthResult<String> {
        if !self.verifier.verify(username, password).await {
            tracing::info!(user = %username, "Login failed");
            return Err(OAuthError::InvalidCredentials);
        }

        let code_lifetime = self.lifetimes.authorization_code;
        let code = self
            .store
            .transaction(|tx| {
                let pending = tx
                    .pop::<PendingAuthorization>(pending_id)
                    .ok_or(OAuthError::SessionExpired)?;
                let code = AuthorizationCode {
                    code: generate_token("code_"),
                    client_id: pending.client_id,
                    redirect_uri: pending.redirect_uri,
                    scopes: pending.scopes,
                    code_challenge: pending.code_challenge,
                    user: username.to_owned(),
                    expires_at: tx.now() + code_lifetime,
                    redirect_uri_provided_explicitly: pending.redirect_uri_provided_explicitly,
                };
                tx.insert(code.code.clone(), code.clone());
                Ok::<_, OAuthError>((code, pending.state))
            })
            .await;

        let (code, state) = code?;
        tracing::info!(user = %username, client_id = %code.client_id, "Login succeeded, issued authorization code");
        build_redirect(&code.redirect_uri, &code.code, state.as_deref())
    }

    // ─── Authorization code grant ────────────────────────────────────────────

    /// Look up an authorization code. Expired codes read as absent.
    pub async fn load_authorization_code(&self, code: &str) -> Option<AuthorizationCode> {
        self.sweep_expired().await;
        self.store.get::<AuthorizationCode>(code).await
    }

    /// Token endpoint checks for a code before it is consumed.
    pub fn verify_code_exchange(
        &self,
        code: &AuthorizationCode,
        client_id: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> OAuthResult<()> {
        if code.client_id != client_id {
            return Err(OAuthError::invalid_grant("Authorization code was issued to another client"));
        }

        if code.redirect_uri_provided_explicitly && redirect_uri != Some(code.redirect_uri.as_str())
        {
            return Err(OAuthError::invalid_grant("redirect_uri mismatch"));
        }

        if let Some(challenge) = code.code_challenge.as_deref() {
            let Some(verifier) = code_verifier else {
                return Err(OAuthError::invalid_request("Missing code_verifier"));
            };
            if !pkce::verify_s256(verifier, challenge) {
                return Err(OAuthError::invalid_grant("PKCE verification failed"));
            }
        }

        Ok(())
    }

    /// Consume an authorization code and issue a token pair, atomically.
    pub async fn exchange_authorization_code(&self, code: &str) -> OAuthResult<TokenResponse> {
        let lifetimes = self.lifetimes;
        let (response, client_id) = self
            .store
            .transaction(|tx| {
                let stored = tx
                    .pop::<AuthorizationCode>(code)
                    .ok_or_else(|| OAuthError::invalid_grant("Invalid or expired authorization code"))?;
                let response =
                    issue_token_pair(tx, lifetimes, &stored.user, &stored.client_id, stored.scopes);
                Ok::<_, OAuthError>((response, stored.client_id))
            })
            .await?;

        tracing::info!(client_id = %client_id, "Issued token pair");
        Ok(response)
    }

    // ─── Tokens ──────────────────────────────────────────────────────────────

    /// Validate a bearer token.
    pub async fn load_access_token(&self, token: &str) -> Option<AccessToken> {
        self.sweep_expired().await;
        self.store.get::<AccessToken>(token).await
    }

    /// Look up a refresh token.
    pub async fn load_refresh_token(&self, token: &str) -> Option<RefreshToken> {
        self.sweep_expired().await;
        self.store.get::<RefreshToken>(token).await
    }

    /// Rotate a refresh token into a new token pair.
    ///
    /// Empty `requested_scopes` keeps the original grant; otherwise they must
    /// be a subset of it. A scope failure leaves the refresh token usable.
    pub async fn exchange_refresh_token(
        &self,
        token: &str,
        requested_scopes: &[String],
    ) -> OAuthResult<TokenResponse> {
        let lifetimes = self.lifetimes;
        let (response, client_id) = self
            .store
            .transaction(|tx| {
                let original = tx
                    .get::<RefreshToken>(token)
                    .ok_or_else(|| OAuthError::invalid_grant("Invalid or expired refresh token"))?;

                let scopes = effective_scopes(&original.scopes, requested_scopes)?;
                let user = original.user.clone();
                let client_id = original.client_id.clone();

                tx.pop::<RefreshToken>(token);
                let response = issue_token_pair(tx, lifetimes, &user, &client_id, scopes);
                Ok::<_, OAuthError>((response, client_id))
            })
            .await?;

        tracing::info!(client_id = %client_id, "Refreshed token pair");
        Ok(response)
    }

    /// Revoke a token of either kind. Unknown tokens are ignored.
    pub async fn revoke_token(&self, token: &str) -> OAuthResult<()> {
        let removed = self
            .store
            .transaction(|tx| {
                let access = tx.delete::<AccessToken>(token);
                let refresh = tx.delete::<RefreshToken>(token);
                Ok::<_, OAuthError>(access || refresh)
            })
            .await?;

        if removed {
            tracing::info!("Revoked token");
        }
        Ok(())
    }

    /// Lazy expiry sweep run before lookups. Failures only cost disk space.
    async fn sweep_expired(&self) {
        if let Err(e) = self.store.sweep().await {
            tracing::warn!(error = %e, "Expiry sweep could not be persisted");
        }
    }
}

impl std::fmt::Debug for AuthorizationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationServer")
            .field("base_url", &self.base_url)
            .field("redirect_policy", &self.redirect_policy.name())
            .finish()
    }
}

fn issue_token_pair(
    tx: &mut Transaction<'_>,
    lifetimes: TokenLifetimes,
    user: &str,
    client_id: &str,
    scopes: Vec<String>,
) -> TokenResponse {
    let now: DateTime<Utc> = tx.now();
    let access = AccessToken {
        token: generate_token("at_"),
        user: user.to_owned(),
        client_id: client_id.to_owned(),
        scopes: scopes.clone(),
        expires_at: now + lifetimes.access_token,
    };
    let refresh = RefreshToken {
        token: generate_token("rt_"),
        user: user.to_owned(),
        client_id: client_id.to_owned(),
        scopes,
        expires_at: now + lifetimes.refresh_token,
    };

    let response = TokenResponse::new(&access, &refresh, now);
    tx.insert(access.token.clone(), access);
    tx.insert(refresh.token.clone(), refresh);
    response
}

/// Scopes for a refreshed pair.
pub fn effective_scopes(original: &[String], requested: &[String]) -> OAuthResult<Vec<String>> {
    if requested.is_empty() {
        return Ok(original.to_vec());
    }
    if let Some(extra) = requested.iter().find(|scope| !original.contains(scope)) {
        return Err(OAuthError::InvalidScope(format!(
            "scope '{extra}' was not part of the original grant"
        )));
    }
    Ok(requested.to_vec())
}

fn parse_redirect_uri(uri: &str) -> OAuthResult<Url> {
    let url = Url::parse(uri)
        .map_err(|e| OAuthError::invalid_request(format!("Invalid redirect_uri: {e}")))?;
    if url.fragment().is_some() {
        return Err(OAuthError::invalid_request("redirect_uri must not contain a fragment"));
    }
    Ok(url)
}

/// Append `code` and `state` to the client's redirect URI, keeping its query.
fn build_redirect(redirect_uri: &str, code: &str, state: Option<&str>) -> OAuthResult<String> {
    let mut url = parse_redirect_uri(redirect_uri)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("code", code);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url.into())
}
