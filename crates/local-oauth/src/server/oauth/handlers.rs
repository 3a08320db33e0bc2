//! OAuth 2.0 endpoint handlers.
//!
//! Implements:
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256)
//! - RFC 6749: Authorization Code Grant with an interactive login step
//! - RFC 7009: Token Revocation
//! - RFC 6750: Bearer token validation

use std::sync::Arc;

use axum::{
    Extension, Form, Json,
    extract::{Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use axum_extra::headers::{
    Authorization, HeaderMapExt,
    authorization::{Basic, Bearer},
};
use serde::Deserialize;

use super::login::{render_login_page, render_session_expired};
use super::pkce::METHOD_S256;
use super::types::{
    AccessToken, AuthorizationParams, ClientRegistration, TokenResponse, join_scopes, parse_scopes,
};
use crate::error::OAuthError;
use crate::server::transport::HttpState;

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            Self::Storage(e) => {
                tracing::error!(error = %e, "Token store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };

        let mut response = (
            status,
            Json(serde_json::json!({
                "error": self.error_code(),
                "error_description": self.description()
            })),
        )
            .into_response();
        no_store(&mut response);
        if status == StatusCode::UNAUTHORIZED {
            // RFC 6749 §5.2
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="local-oauth""#),
            );
        }
        response
    }
}

/// Cache headers required on token endpoint responses (RFC 6749 §5.1).
fn no_store(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => OAuthError::invalid_request("redirect target is not a valid header value")
            .into_response(),
    }
}

// ─── RFC 9728: Protected Resource Metadata ───────────────────────────────────

/// `GET /.well-known/oauth-protected-resource`
///
/// Tells clients where to find the authorization server for this resource.
pub async fn handle_protected_resource(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "resource": state.base_url,
        "authorization_servers": [state.base_url],
        "bearer_methods_supported": ["header"]
    }))
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
pub async fn handle_auth_server_metadata(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "issuer": state.base_url,
        "authorization_endpoint": format!("{}/authorize", state.base_url),
        "token_endpoint": format!("{}/token", state.base_url),
        "registration_endpoint": format!("{}/register", state.base_url),
        "revocation_endpoint": format!("{}/revoke", state.base_url),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_basic", "client_secret_post"],
        "code_challenge_methods_supported": [METHOD_S256]
    }))
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

/// `POST /register`
///
/// The response is the only place the client secret is ever shown.
pub async fn handle_register(
    State(state): State<Arc<HttpState>>,
    Json(registration): Json<ClientRegistration>,
) -> Response {
    let client = match state.provider.register_client(registration).await {
        Ok(client) => client,
        Err(e) => return e.into_response(),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "client_id": client.client_id,
            "client_secret": client.client_secret,
            "client_id_issued_at": client.client_id_issued_at.timestamp(),
            "client_secret_expires_at": 0,
            "client_name": client.client_name,
            "redirect_uris": client.redirect_uris,
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": client.token_endpoint_auth_method.as_str()
        })),
    )
        .into_response()
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
}

/// `GET /authorize`
pub async fn handle_authorize_get(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    authorize(&state, query).await
}

/// `POST /authorize`
pub async fn handle_authorize_post(
    State(state): State<Arc<HttpState>>,
    Form(query): Form<AuthorizeQuery>,
) -> Response {
    authorize(&state, query).await
}

/// Validate the request, park it, and send the browser to the login page.
async fn authorize(state: &HttpState, query: AuthorizeQuery) -> Response {
    let Some(client_id) = query.client_id.as_deref().filter(|id| !id.is_empty()) else {
        return OAuthError::invalid_request("Missing client_id").into_response();
    };
    match query.response_type.as_deref() {
        Some("code") => {}
        Some(other) => return OAuthError::UnsupportedResponseType(other.to_owned()).into_response(),
        None => return OAuthError::invalid_request("Missing response_type").into_response(),
    }
    if query.code_challenge.as_deref().is_none_or(str::is_empty) {
        return OAuthError::invalid_request("Missing code_challenge").into_response();
    }
    if query.code_challenge_method.as_deref() != Some(METHOD_S256) {
        return OAuthError::invalid_request("code_challenge_method must be 'S256'")
            .into_response();
    }

    let client = match state.provider.get_client(client_id).await {
        Ok(client) => client,
        Err(e) => return e.into_response(),
    };

    let params = AuthorizationParams {
        redirect_uri: query.redirect_uri,
        scopes: parse_scopes(query.scope.as_deref()),
        state: query.state,
        code_challenge: query.code_challenge,
    };

    match state.provider.authorize(&client, params).await {
        Ok(login_url) => found(&login_url),
        Err(e) => {
            tracing::info!(client_id = %client_id, error = %e, "Rejected authorization request");
            e.into_response()
        }
    }
}

// ─── Login ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub pending: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub pending: String,
}

fn session_expired() -> Response {
    (StatusCode::BAD_REQUEST, Html(render_session_expired())).into_response()
}

/// `GET /login`
pub async fn handle_login_get(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<LoginQuery>,
) -> Response {
    let Some(pending_id) = query.pending.as_deref() else {
        return session_expired();
    };
    if state.provider.load_pending_authorization(pending_id).await.is_none() {
        return session_expired();
    }
    Html(render_login_page(Some(pending_id), None)).into_response()
}

/// `POST /login`
pub async fn handle_login_post(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<LoginForm>,
) -> Response {
    match state
        .provider
        .complete_login(&form.pending, &form.username, &form.password)
        .await
    {
        Ok(redirect) => found(&redirect),
        Err(OAuthError::InvalidCredentials) => Html(render_login_page(
            Some(form.pending.as_str()),
            Some("Invalid username or password"),
        ))
        .into_response(),
        Err(OAuthError::SessionExpired) => session_expired(),
        Err(e) => e.into_response(),
    }
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// `POST /token`
///
/// Exchange an authorization code for tokens, or rotate a refresh token.
pub async fn handle_token(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Form(form): Form<TokenRequest>,
) -> Response {
    match token(&state, &headers, form).await {
        Ok(response) => token_success(&response),
        Err(e) => e.into_response(),
    }
}

async fn token(
    state: &HttpState,
    headers: &HeaderMap,
    form: TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let basic = headers.typed_get::<Authorization<Basic>>();
    let client_id = form
        .client_id
        .clone()
        .or_else(|| basic.as_ref().map(|auth| auth.username().to_owned()))
        .ok_or_else(|| OAuthError::invalid_client("Missing client_id"))?;
    let secret = basic
        .as_ref()
        .map(|auth| auth.password().to_owned())
        .or_else(|| form.client_secret.clone());

    let client = state
        .provider
        .find_client(&client_id)
        .await
        .ok_or_else(|| OAuthError::invalid_client("Unknown client_id"))?;
    state.provider.authenticate_client(&client, secret.as_deref())?;

    match form.grant_type.as_deref() {
        Some("authorization_code") => authorization_code_grant(state, &client.client_id, &form).await,
        Some("refresh_token") => refresh_token_grant(state, &client.client_id, &form).await,
        Some(other) => Err(OAuthError::UnsupportedGrantType(other.to_owned())),
        None => Err(OAuthError::invalid_request("Missing grant_type")),
    }
}

async fn authorization_code_grant(
    state: &HttpState,
    client_id: &str,
    form: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let code = form
        .code
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("Missing code"))?;

    let stored = state
        .provider
        .load_authorization_code(code)
        .await
        .ok_or_else(|| OAuthError::invalid_grant("Invalid or expired authorization code"))?;

    state.provider.verify_code_exchange(
        &stored,
        client_id,
        form.redirect_uri.as_deref(),
        form.code_verifier.as_deref(),
    )?;

    state.provider.exchange_authorization_code(code).await
}

async fn refresh_token_grant(
    state: &HttpState,
    client_id: &str,
    form: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let token = form
        .refresh_token
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("Missing refresh_token"))?;

    let stored = state
        .provider
        .load_refresh_token(token)
        .await
        .ok_or_else(|| OAuthError::invalid_grant("Invalid or expired refresh token"))?;
    if stored.client_id != client_id {
        return Err(OAuthError::invalid_grant("Refresh token was issued to another client"));
    }

    let scopes = parse_scopes(form.scope.as_deref());
    state.provider.exchange_refresh_token(token, &scopes).await
}

fn token_success(response: &TokenResponse) -> Response {
    let mut http = Json(response).into_response();
    no_store(&mut http);
    http
}

// ─── RFC 7009: Revocation ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
}

/// `POST /revoke`
///
/// Succeeds whether or not the token existed.
pub async fn handle_revoke(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<RevokeRequest>,
) -> Response {
    let Some(token) = form.token.as_deref().filter(|t| !t.is_empty()) else {
        return OAuthError::invalid_request("Missing token").into_response();
    };
    tracing::debug!(hint = ?form.token_type_hint, "Revocation request");

    match state.provider.revoke_token(token).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

// ─── Bearer validation ───────────────────────────────────────────────────────

/// Middleware guarding protected routes.
///
/// A valid token is stored in the request extensions as [`AccessToken`].
pub async fn require_bearer(
    State(state): State<Arc<HttpState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request.headers().typed_get::<Authorization<Bearer>>() {
        Some(auth) => state.provider.load_access_token(auth.token()).await,
        None => return unauthorized(&state.base_url, None),
    };

    match token {
        Some(token) => {
            request.extensions_mut().insert(token);
            next.run(request).await
        }
        None => unauthorized(&state.base_url, Some("invalid_token")),
    }
}

fn unauthorized(base_url: &str, error: Option<&str>) -> Response {
    let metadata = format!("{base_url}/.well-known/oauth-protected-resource");
    let challenge = match error {
        Some(error) => format!(r#"Bearer error="{error}", resource_metadata="{metadata}""#),
        None => format!(r#"Bearer resource_metadata="{metadata}""#),
    };

    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": error.unwrap_or("invalid_request"),
            "error_description": "Bearer token required"
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// `GET /userinfo`
///
/// Identity behind the presented bearer token.
pub async fn handle_userinfo(Extension(token): Extension<AccessToken>) -> impl IntoResponse {
    Json(serde_json::json!({
        "sub": token.user,
        "client_id": token.client_id,
        "scope": join_scopes(&token.scopes),
        "exp": token.expires_at.timestamp()
    }))
}
