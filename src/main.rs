//! # ChatHome CLI (`chathome`)
//!
//! The `chathome` binary initialises storage, manages accounts, issues bearer
//! tokens and runs the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! chathome --config ./config/chathome.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chathome init` | Create the SQLite database, run migrations, create the blob root |
//! | `chathome serve` | Start the HTTP server |
//! | `chathome user add` | Create a user |
//! | `chathome user list` | List users |
//! | `chathome token --handle <h>` | Print a bearer token for an existing user |
//!
//! ## Examples
//!
//! ```bash
//! export CHATHOME_JWT_SECRET=change-me
//! chathome init
//! chathome user add --handle kai --name Kai --role kid
//! chathome token --handle kai
//! OPENAI_API_KEY=sk-... chathome serve
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chathome::config::{self, Config};
use chathome::{migrate, server, users};

/// ChatHome: a multi-tenant chat backend with grounded context and streamed
/// model completions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chathome.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chathome",
    about = "ChatHome: a multi-tenant chat backend with streamed model completions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chathome.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and blob root.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Start the HTTP server.
    ///
    /// Stops gracefully on Ctrl-C or SIGTERM.
    Serve,

    /// Manage user accounts.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Print a bearer token for an existing user.
    Token {
        /// Handle of the user to issue for.
        #[arg(long)]
        handle: String,

        /// Token lifetime in seconds; defaults to `auth.token_ttl_secs`.
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user.
    Add {
        /// Unique login handle.
        #[arg(long)]
        handle: String,

        /// Display name used in prompts and relayed messages.
        #[arg(long)]
        name: String,

        /// One of `admin`, `adult`, `kid`.
        #[arg(long, default_value = "adult")]
        role: String,

        /// Opaque credential material kept for an external auth service.
        #[arg(long)]
        secret: Option<String>,
    },

    /// List all users.
    List,
}

fn init_tracing(config: &Config) {
    let (filter, rejected) = match std::env::var("RUST_LOG") {
        Ok(spec) => match EnvFilter::try_new(&spec) {
            Ok(f) => (f, None),
            Err(e) => (EnvFilter::new("info"), Some(format!("RUST_LOG={}: {}", spec, e))),
        },
        Err(_) => match EnvFilter::try_new(&config.logging.level) {
            Ok(f) => (f, None),
            Err(e) => (
                EnvFilter::new("info"),
                Some(format!("logging.level={}: {}", config.logging.level, e)),
            ),
        },
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }

    if let Some(reason) = rejected {
        tracing::warn!(reason = %reason, "invalid log filter; using info");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.storage.blob_root).with_context(|| {
                format!("Failed to create {}", cfg.storage.blob_root.display())
            })?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::User { action } => match action {
            UserAction::Add {
                handle,
                name,
                role,
                secret,
            } => {
                users::run_user_add(&cfg, &handle, &name, &role, secret).await?;
            }
            UserAction::List => {
                users::run_user_list(&cfg).await?;
            }
        },
        Commands::Token { handle, ttl_secs } => {
            users::run_token(&cfg, &handle, ttl_secs).await?;
        }
    }

    Ok(())
}
