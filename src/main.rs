//! cpa CLI binary entry point.

use clap::Parser;
use cpa::cli::{token, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match token::load_provider(cli.provider_url.as_deref()) {
        Ok(provider) => match cli.command {
            Commands::Token(args) => token::handle_token(provider, &args.domain, args.user).await,
            Commands::Show(args) => token::handle_show(&provider, &args.domain),
            Commands::List => token::handle_list(&provider),
            Commands::Refresh(args) => token::handle_refresh(provider, &args.domain).await,
            Commands::Discard(args) => token::handle_discard(&provider, &args.domain),
            Commands::Reset => token::handle_reset(&provider),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
