//! Full end-to-end tests of the OAuth endpoints via axum's Router.

use std::sync::Arc;

use argon2::Params;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use tower::ServiceExt;

use local_oauth::config::Config;
use local_oauth::credentials::{HtpasswdFile, hash_password_with};
use local_oauth::server::oauth::pkce::challenge_s256;
use local_oauth::server::oauth::{AuthorizationServer, OAuthStore};
use local_oauth::server::transport::create_router;

const BASE_URL: &str = "http://localhost:3000";
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CALLBACK: &str = "https://client.example.com/cb";

async fn build_test_router(dir: &tempfile::TempDir) -> axum::Router {
    let config = Config::for_testing(dir.path());
    let hash = hash_password_with("correctpass", Params::new(1024, 1, 1, None).unwrap()).unwrap();
    std::fs::write(&config.credentials_path, format!("admin:{hash}\n")).unwrap();

    let store = Arc::new(OAuthStore::open(&config.token_db_path).await);
    let verifier = Arc::new(HtpasswdFile::new(&config.credentials_path));
    create_router(Arc::new(AuthorizationServer::new(&config, store, verifier)))
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn location(response: &Response<Body>) -> String {
    response.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_string()
}

fn query_param(url: &str, name: &str) -> String {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .unwrap()
}

fn form_post(uri: &str, params: &[(&str, &str)]) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(serde_urlencoded::to_string(params).unwrap()))
        .unwrap()
}

fn basic(client_id: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{client_id}:{secret}")))
}

fn authorize_uri(client_id: &str, extra: &[(&str, &str)]) -> String {
    let challenge = challenge_s256(VERIFIER);
    let mut params = vec![
        ("response_type", "code"),
        ("client_id", client_id),
        ("redirect_uri", CALLBACK),
        ("code_challenge", challenge.as_str()),
        ("code_challenge_method", "S256"),
        ("state", "xyz123"),
        ("scope", "read"),
    ];
    params.retain(|(key, _)| !extra.iter().any(|(k, _)| k == key));
    params.extend_from_slice(extra);
    format!("/authorize?{}", serde_urlencoded::to_string(&params).unwrap())
}

async fn register(app: &axum::Router) -> (String, String) {
    let response = app
        .clone()
        .oneshot(
            Request::post("/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "client_name": "Integration Test Client",
                        "redirect_uris": [CALLBACK]
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let info = body_json(response).await;
    (
        info["client_id"].as_str().unwrap().to_string(),
        info["client_secret"].as_str().unwrap().to_string(),
    )
}

/// Authorize and log in, returning the authorization code.
async fn login_for_code(app: &axum::Router, client_id: &str) -> String {
    let response = app
        .clone()
        .oneshot(Request::get(authorize_uri(client_id, &[])).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let pending = query_param(&location(&response), "pending");

    let response = app
        .clone()
        .oneshot(form_post(
            "/login",
            &[("username", "admin"), ("password", "correctpass"), ("pending", &pending)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    query_param(&location(&response), "code")
}

#[tokio::test]
async fn test_full_oauth_http_flow() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;

    // 1. Discovery
    let response = app
        .clone()
        .oneshot(Request::get("/.well-known/oauth-protected-resource").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metadata = body_json(response).await;
    assert_eq!(metadata["authorization_servers"][0], BASE_URL);

    // 2. Register client
    let (client_id, secret) = register(&app).await;
    assert!(secret.starts_with("secret_"));

    // 3. Authorize redirects to the login page
    let response = app
        .clone()
        .oneshot(Request::get(authorize_uri(&client_id, &[])).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let login_url = location(&response);
    assert!(login_url.starts_with(&format!("{BASE_URL}/login?pending=")));
    let pending = query_param(&login_url, "pending");

    // 4. Login page renders the form
    let response = app
        .clone()
        .oneshot(Request::get(format!("/login?pending={pending}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains(r#"name="username""#));
    assert!(html.contains(&pending));

    // 5. Wrong password re-renders with an error
    let response = app
        .clone()
        .oneshot(form_post(
            "/login",
            &[("username", "admin"), ("password", "wrongpass"), ("pending", &pending)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Invalid username or password"));

    // 6. Correct password redirects to the client with code and state
    let response = app
        .clone()
        .oneshot(form_post(
            "/login",
            &[("username", "admin"), ("password", "correctpass"), ("pending", &pending)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let callback = location(&response);
    assert!(callback.starts_with(CALLBACK));
    assert_eq!(query_param(&callback, "state"), "xyz123");
    let code = query_param(&callback, "code");

    // 7. Exchange the code with HTTP Basic client authentication
    let mut request = form_post(
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", CALLBACK),
            ("code_verifier", VERIFIER),
        ],
    );
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, basic(&client_id, &secret).parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert_eq!(response.headers().get(header::PRAGMA).unwrap(), "no-cache");

    let tokens = body_json(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["scope"], "read");
    let access_token = tokens["access_token"].as_str().unwrap().to_string();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    // 8. Protected endpoint accepts the token
    let response = app
        .clone()
        .oneshot(
            Request::get("/userinfo")
                .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["sub"], "admin");
    assert_eq!(info["client_id"], client_id.as_str());

    // 9. Refresh with the secret in the form body
    let response = app
        .clone()
        .oneshot(form_post(
            "/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", &client_id),
                ("client_secret", &secret),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let refreshed = body_json(response).await;
    assert_ne!(refreshed["access_token"], tokens["access_token"]);
    let new_access = refreshed["access_token"].as_str().unwrap().to_string();

    // 10. The old refresh token is spent
    let response = app
        .clone()
        .oneshot(form_post(
            "/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", &client_id),
                ("client_secret", &secret),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");

    // 11. Revoke and the token stops working
    let response = app
        .clone()
        .oneshot(form_post("/revoke", &[("token", &new_access)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::get("/userinfo")
                .header(header::AUTHORIZATION, format!("Bearer {new_access}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_public_client_flow_with_pkce() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;

    // Unknown client ids are registered on first use
    let code = login_for_code(&app, "claude-desktop").await;

    let response = app
        .clone()
        .oneshot(form_post(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", CALLBACK),
                ("client_id", "claude-desktop"),
                ("code_verifier", VERIFIER),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_rejects_wrong_verifier_and_missing_verifier() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;
    let code = login_for_code(&app, "public-client").await;

    let wrong = "W".repeat(43);
    let response = app
        .clone()
        .oneshot(form_post(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", CALLBACK),
                ("client_id", "public-client"),
                ("code_verifier", &wrong),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");

    let response = app
        .clone()
        .oneshot(form_post(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", CALLBACK),
                ("client_id", "public-client"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_confidential_client_requires_secret() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;
    let (client_id, _secret) = register(&app).await;
    let code = login_for_code(&app, &client_id).await;

    for secret in [None, Some("secret_wrong")] {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", CALLBACK),
            ("client_id", client_id.as_str()),
            ("code_verifier", VERIFIER),
        ];
        if let Some(secret) = secret {
            params.push(("client_secret", secret));
        }
        let response = app.clone().oneshot(form_post("/token", &params)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap(),
            r#"Basic realm="local-oauth""#
        );
        assert_eq!(body_json(response).await["error"], "invalid_client");
    }
}

#[tokio::test]
async fn test_wrong_basic_credentials_get_basic_challenge() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;
    let (client_id, _secret) = register(&app).await;
    let code = login_for_code(&app, &client_id).await;

    let mut request = form_post(
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", CALLBACK),
            ("code_verifier", VERIFIER),
        ],
    );
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, basic(&client_id, "secret_wrong").parse().unwrap());

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.starts_with("Basic "));
    assert_eq!(body_json(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;
    login_for_code(&app, "public-client").await;

    let response = app
        .clone()
        .oneshot(form_post("/token", &[("grant_type", "password"), ("client_id", "public-client")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_authorize_validation() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;

    let cases = [
        (authorize_uri("c1", &[("code_challenge_method", "plain")]), "invalid_request"),
        (authorize_uri("c1", &[("response_type", "token")]), "unsupported_response_type"),
        (authorize_uri("c1", &[("redirect_uri", "not a url")]), "invalid_request"),
        (authorize_uri("", &[]), "invalid_request"),
        ("/authorize?response_type=code&client_id=c1".to_string(), "invalid_request"),
    ];

    for (uri, expected) in cases {
        let response =
            app.clone().oneshot(Request::get(&uri).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body_json(response).await["error"], expected, "{uri}");
    }
}

#[tokio::test]
async fn test_authorize_accepts_post() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;
    let challenge = challenge_s256(VERIFIER);

    let response = app
        .clone()
        .oneshot(form_post(
            "/authorize",
            &[
                ("response_type", "code"),
                ("client_id", "c1"),
                ("redirect_uri", CALLBACK),
                ("code_challenge", &challenge),
                ("code_challenge_method", "S256"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).contains("/login?pending="));
}

#[tokio::test]
async fn test_login_with_unknown_pending_is_session_expired() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;

    let response = app
        .clone()
        .oneshot(form_post(
            "/login",
            &[("username", "admin"), ("password", "correctpass"), ("pending", "pending_gone")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("Session expired"));

    let response = app
        .clone()
        .oneshot(Request::get("/login?pending=pending_gone").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_userinfo_requires_bearer() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;

    let response = app
        .clone()
        .oneshot(Request::get("/userinfo").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap();
    assert!(challenge.contains(&format!(
        r#"resource_metadata="{BASE_URL}/.well-known/oauth-protected-resource""#
    )));

    let response = app
        .clone()
        .oneshot(
            Request::get("/userinfo")
                .header(header::AUTHORIZATION, "Bearer at_unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap();
    assert!(challenge.contains(r#"error="invalid_token""#));
}

#[tokio::test]
async fn test_register_duplicate_id_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;

    let request = || {
        Request::post("/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "client_id": "fixed-id" }).to_string()))
            .unwrap()
    };

    let response = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let info = body_json(response).await;
    assert_eq!(info["client_id"], "fixed-id");
    assert_eq!(info["token_endpoint_auth_method"], "client_secret_basic");

    let response = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_client_metadata");
}

#[tokio::test]
async fn test_auth_server_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/.well-known/oauth-authorization-server").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metadata = body_json(response).await;
    assert_eq!(metadata["issuer"], BASE_URL);
    assert_eq!(metadata["token_endpoint"], format!("{BASE_URL}/token"));
    assert_eq!(metadata["code_challenge_methods_supported"], json!(["S256"]));
}

#[tokio::test]
async fn test_health_and_ready() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(&dir).await;

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    register(&app).await;
    let response = app
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ready = body_json(response).await;
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["store"]["clients"], 1);
}
