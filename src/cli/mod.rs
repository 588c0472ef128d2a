//! CLI entry point for cpa.

pub mod prompt;
pub mod token;

use clap::{Parser, Subcommand};

/// Cross-Platform Authentication client
#[derive(Parser, Debug)]
#[command(name = "cpa", version, about = "Obtain and manage CPA access tokens")]
pub struct Cli {
    /// Authorization provider URL (overrides CPA_PROVIDER_URL)
    #[arg(long, global = true)]
    pub provider_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Request a new token for a domain
    Token(TokenArgs),
    /// Show the locally stored token for a domain
    Show(DomainArgs),
    /// List domains with a stored token
    List,
    /// Refresh the stored token for a domain
    Refresh(DomainArgs),
    /// Discard the stored token for a domain
    Discard(DomainArgs),
    /// Forget the registered identity and every stored token
    Reset,
}

/// Arguments for `cpa token`.
#[derive(Parser, Debug)]
pub struct TokenArgs {
    /// Service domain, e.g. playlist.example.org
    pub domain: String,

    /// Pair with a user account instead of requesting a client token
    #[arg(short, long)]
    pub user: bool,
}

/// Arguments naming a single domain.
#[derive(Parser, Debug)]
pub struct DomainArgs {
    pub domain: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_command_parses_user_flag() {
        let cli = Cli::parse_from(["cpa", "token", "playlist.example.org", "--user"]);
        match cli.command {
            Commands::Token(args) => {
                assert_eq!(args.domain, "playlist.example.org");
                assert!(args.user);
            }
            other => panic!("expected token command, got {other:?}"),
        }
    }

    #[test]
    fn provider_url_is_global() {
        let cli = Cli::parse_from(["cpa", "list", "--provider-url", "https://cpa.example/"]);
        assert_eq!(cli.provider_url.as_deref(), Some("https://cpa.example/"));
        assert!(matches!(cli.command, Commands::List));
    }
}
