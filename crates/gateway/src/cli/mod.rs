pub mod config;
pub mod token;

use clap::{Parser, Subcommand};

/// lexchat: streaming legal-advice chat backend.
#[derive(Debug, Parser)]
#[command(name = "lexchat", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP / WebSocket server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Bearer-token utilities.
    #[command(subcommand)]
    Token(TokenCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Sign a bearer token for a user with the configured secret.
    Issue {
        /// User id the token authenticates as.
        #[arg(long)]
        user: String,
        /// Lifetime in seconds (defaults to `auth.token_ttl_secs`).
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `LX_CONFIG` (or
/// `config.toml` by default). Returns the parsed [`Config`] and the
/// path that was used.
///
/// [`Config`]: lx_domain::config::Config
pub fn load_config() -> anyhow::Result<(lx_domain::config::Config, String)> {
    let config_path = std::env::var("LX_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        lx_domain::config::Config::default()
    };

    Ok((config, config_path))
}
