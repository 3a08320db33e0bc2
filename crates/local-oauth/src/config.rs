//! Configuration for the local OAuth server.

use std::path::{Path, PathBuf};

use chrono::Duration;

/// Default settings.
pub mod defaults {
    /// HTTP listen port.
    pub const PORT: u16 = 3001;

    /// Public base URL used for login redirects and discovery metadata.
    pub const BASE_URL: &str = "http://localhost:3001";

    /// Credential file (htpasswd format, Argon2 hashes).
    pub const CREDENTIALS_PATH: &str = ".htpasswd";

    /// JSON token database.
    pub const TOKEN_DB_PATH: &str = ".token_db.json";

    /// Username written when bootstrapping a missing credential file.
    pub const BOOTSTRAP_USERNAME: &str = "admin";

    /// Access token lifetime in seconds (30 days).
    pub const ACCESS_TOKEN_LIFETIME_SECS: i64 = 30 * 24 * 3600;

    /// Refresh token lifetime in seconds (30 days).
    pub const REFRESH_TOKEN_LIFETIME_SECS: i64 = 30 * 24 * 3600;

    /// Authorization code lifetime in seconds (10 minutes).
    pub const AUTH_CODE_LIFETIME_SECS: i64 = 600;

    /// Pending authorization lifetime in seconds (10 minutes).
    pub const PENDING_AUTH_LIFETIME_SECS: i64 = 600;
}

/// How long each kind of record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access_token: Duration,
    pub refresh_token: Duration,
    pub authorization_code: Duration,
    pub pending_authorization: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_token: Duration::seconds(defaults::ACCESS_TOKEN_LIFETIME_SECS),
            refresh_token: Duration::seconds(defaults::REFRESH_TOKEN_LIFETIME_SECS),
            authorization_code: Duration::seconds(defaults::AUTH_CODE_LIFETIME_SECS),
            pending_authorization: Duration::seconds(defaults::PENDING_AUTH_LIFETIME_SECS),
        }
    }
}

/// Which redirect URI policy the server enforces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RedirectPolicyKind {
    /// Accept any syntactically valid redirect URI (single-operator deployments)
    #[default]
    Permissive,
    /// Require an exact match against the client's registered redirect URIs
    Registered,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,

    /// Public base URL, without trailing slash.
    pub base_url: String,

    /// Credential file path.
    pub credentials_path: PathBuf,

    /// Token database path.
    pub token_db_path: PathBuf,

    /// Record lifetimes.
    pub lifetimes: TokenLifetimes,

    /// Redirect URI policy.
    pub redirect_policy: RedirectPolicyKind,

    /// Create a credential file with a generated admin password if none exists.
    pub bootstrap_credentials: bool,
}

impl Config {
    /// Create a configuration with the given base URL and default everything else.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            ..Self::default()
        }
    }

    /// Create a test configuration with all files under `dir` and no bootstrap.
    #[must_use]
    pub fn for_testing(dir: &Path) -> Self {
        Self {
            port: 0,
            base_url: "http://localhost:3000".to_string(),
            credentials_path: dir.join(".htpasswd"),
            token_db_path: dir.join(".token_db.json"),
            lifetimes: TokenLifetimes::default(),
            redirect_policy: RedirectPolicyKind::Permissive,
            bootstrap_credentials: false,
        }
    }

    /// Set the credential file path.
    #[must_use]
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    /// Set the token database path.
    #[must_use]
    pub fn with_token_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_db_path = path.into();
        self
    }

    /// Set the redirect policy.
    #[must_use]
    pub const fn with_redirect_policy(mut self, policy: RedirectPolicyKind) -> Self {
        self.redirect_policy = policy;
        self
    }

    /// URL of the login page.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: defaults::PORT,
            base_url: defaults::BASE_URL.to_string(),
            credentials_path: PathBuf::from(defaults::CREDENTIALS_PATH),
            token_db_path: PathBuf::from(defaults::TOKEN_DB_PATH),
            lifetimes: TokenLifetimes::default(),
            redirect_policy: RedirectPolicyKind::default(),
            bootstrap_credentials: true,
        }
    }
}

fn normalize_base_url(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
