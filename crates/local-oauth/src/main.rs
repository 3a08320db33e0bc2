//! Local OAuth server - Entry Point

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use local_oauth::config::{Config, RedirectPolicyKind, defaults};
use local_oauth::credentials::credential_line;
use local_oauth::server::AuthServer;

#[derive(Parser, Debug)]
#[command(name = "local-oauth")]
#[command(about = "Local OAuth 2.0 authorization server with password login")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP server port
    #[arg(long, default_value_t = defaults::PORT, env = "LOCAL_MCP_PORT", global = true)]
    port: u16,

    /// Public base URL used in metadata and redirects
    #[arg(long, default_value = defaults::BASE_URL, env = "LOCAL_MCP_BASE_URL", global = true)]
    base_url: String,

    /// Credential file (`username:argon2-hash` per line)
    #[arg(long, default_value = defaults::CREDENTIALS_PATH, env = "LOCAL_MCP_HTPASSWD", global = true)]
    htpasswd: PathBuf,

    /// Token database file
    #[arg(long, default_value = defaults::TOKEN_DB_PATH, env = "LOCAL_MCP_TOKEN_DB", global = true)]
    token_db: PathBuf,

    /// Which redirect URIs clients may use
    #[arg(long, value_enum, default_value_t, env = "LOCAL_MCP_REDIRECT_POLICY", global = true)]
    redirect_policy: RedirectPolicyKind,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Print a credential file line for a user
    HashPassword {
        /// Username for the line
        username: String,
        /// Password to hash; read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

async fn read_password_from_stdin() -> anyhow::Result<String> {
    let mut line = String::new();
    tokio::io::BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_owned();
    anyhow::ensure!(!password.is_empty(), "Password must not be empty");
    Ok(password)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::HashPassword { username, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password_from_stdin().await?,
            };
            let line = tokio::task::spawn_blocking(move || credential_line(&username, &password))
                .await??;
            println!("{line}");
        }
        Command::Serve => {
            init_tracing(&cli.log_level, cli.json_logs);

            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                port = cli.port,
                "Starting local OAuth server"
            );

            let mut config = Config::new(cli.base_url)
                .with_credentials_path(cli.htpasswd)
                .with_token_db_path(cli.token_db)
                .with_redirect_policy(cli.redirect_policy);
            config.port = cli.port;

            let server = AuthServer::new(&config).await?;
            server.run_http().await?;
        }
    }

    Ok(())
}
