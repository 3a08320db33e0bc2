//! Authorization server wiring.
//!
//! Opens the token store and credential file, then serves the OAuth
//! endpoints over HTTP.

pub mod oauth;
pub mod transport;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, defaults};
use crate::credentials::HtpasswdFile;
use oauth::{AuthorizationServer, OAuthStore};

/// The HTTP authorization server.
pub struct AuthServer {
    port: u16,
    provider: Arc<AuthorizationServer>,
}

impl AuthServer {
    /// Open the store and credential file described by `config`.
    ///
    /// When bootstrap is enabled and the credential file does not exist, it is
    /// created with one user and a generated password, printed once.
    ///
    /// # Errors
    ///
    /// Returns error if the credential file cannot be created.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let credentials = HtpasswdFile::new(&config.credentials_path);

        if config.bootstrap_credentials {
            if let Some(password) =
                credentials.bootstrap_if_missing(defaults::BOOTSTRAP_USERNAME).await?
            {
                tracing::warn!(
                    path = %credentials.path().display(),
                    username = defaults::BOOTSTRAP_USERNAME,
                    "Created credential file with a generated password"
                );
                // Shown even when logging is filtered out
                eprintln!(
                    "{}",
                    bootstrap_notice(credentials.path(), defaults::BOOTSTRAP_USERNAME, &password)
                );
            }
        }

        let store = Arc::new(OAuthStore::open(&config.token_db_path).await);
        let provider = AuthorizationServer::new(config, store, Arc::new(credentials));
        tracing::info!(
            base_url = %config.base_url,
            redirect_policy = ?config.redirect_policy,
            "Authorization server ready"
        );

        Ok(Self { port: config.port, provider: Arc::new(provider) })
    }

    /// The protocol state machine.
    #[must_use]
    pub const fn provider(&self) -> &Arc<AuthorizationServer> {
        &self.provider
    }

    /// Run the server in HTTP mode.
    ///
    /// # Errors
    ///
    /// Returns error on server failure.
    pub async fn run_http(self) -> anyhow::Result<()> {
        let router = transport::create_router(self.provider);
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));

        tracing::info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for AuthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServer").field("port", &self.port).finish_non_exhaustive()
    }
}

/// Operator message announcing a generated password.
fn bootstrap_notice(path: &Path, username: &str, password: &str) -> String {
    format!(
        "Created {} with user '{username}' and password: {password}\n\
         Change it with `local-oauth hash-password {username}`.",
        path.display()
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
