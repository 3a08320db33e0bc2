//! Local OAuth 2.0 authorization server.
//!
//! Lets MCP clients obtain bearer tokens for a single-operator deployment.
//! Users authenticate against a local htpasswd-style credential file; clients,
//! authorization codes and tokens are kept in a JSON file that survives
//! restarts.
//!
//! # Features
//!
//! - **Authorization code grant with PKCE** (S256 only)
//! - **Refresh token rotation**: every refresh token is single-use
//! - **Dynamic client registration** and automatic registration of unknown clients
//! - **Atomic persistence**: every mutation rewrites the store via rename
//!
//! # Example
//!
//! ```no_run
//! use local_oauth::{config::Config, server::AuthServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let server = AuthServer::new(&config).await?;
//!     server.run_http().await
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod server;

pub use config::Config;
pub use error::{CredentialError, OAuthError, StoreError};
pub use server::AuthServer;
pub use server::oauth::AuthorizationServer;
