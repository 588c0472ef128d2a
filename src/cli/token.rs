//! CLI handlers for token requests and local token management.

use std::sync::Arc;

use super::prompt::ConsolePresenter;
use crate::auth::{CpaProvider, Token, TokenType};
use crate::config::CpaConfig;
use crate::error::{CpaError, Result};

/// Build a provider from the environment, honoring `--provider-url`.
pub fn load_provider(provider_url: Option<&str>) -> Result<Arc<CpaProvider>> {
    let config = match provider_url {
        Some(url) => CpaConfig::from_lookup(|key| match key {
            "CPA_PROVIDER_URL" => Some(url.to_string()),
            other => std::env::var(other).ok(),
        })?,
        None => CpaConfig::from_env()?,
    };
    let provider = CpaProvider::new(config)?.with_interaction(Arc::new(ConsolePresenter));
    Ok(Arc::new(provider))
}

/// Handle `cpa token <domain> [--user]`.
///
/// Ctrl-C while waiting cancels the negotiation.
pub async fn handle_token(provider: Arc<CpaProvider>, domain: &str, user: bool) -> Result<()> {
    let token_type = if user {
        TokenType::User
    } else {
        TokenType::Client
    };
    let request = provider.request_token(domain, token_type);
    tokio::pin!(request);
    let token = tokio::select! {
        result = &mut request => result?,
        _ = tokio::signal::ctrl_c() => {
            provider.cancel(domain);
            request.await?
        }
    };
    println!("✅ Token obtained for {domain}");
    print_token(&token);
    Ok(())
}

/// Handle `cpa show <domain>`.
pub fn handle_show(provider: &CpaProvider, domain: &str) -> Result<()> {
    match provider.token_for_domain(domain)? {
        Some(token) => print_token(&token),
        None => println!("No token stored for {domain}"),
    }
    Ok(())
}

/// Handle `cpa list`.
pub fn handle_list(provider: &CpaProvider) -> Result<()> {
    let domains = provider.domains()?;
    if domains.is_empty() {
        println!("No tokens stored");
        return Ok(());
    }
    for domain in domains {
        match provider.token_for_domain(&domain) {
            Ok(Some(token)) => println!(
                "{domain:<32} {:<6} {}",
                token.token_type,
                status_label(&token)
            ),
            Ok(None) => {}
            Err(err) => println!("{domain:<32} unreadable: {err}"),
        }
    }
    Ok(())
}

/// Handle `cpa refresh <domain>`.
pub async fn handle_refresh(provider: Arc<CpaProvider>, domain: &str) -> Result<()> {
    let token = provider.refresh_token(domain).await?;
    println!("🔄 Token refreshed for {domain}");
    print_token(&token);
    Ok(())
}

/// Handle `cpa discard <domain>`.
pub fn handle_discard(provider: &CpaProvider, domain: &str) -> Result<()> {
    if provider.token_for_domain(domain)?.is_none() {
        return Err(CpaError::InvalidRequest(format!(
            "no token stored for domain {domain}"
        )));
    }
    provider.discard_token(domain)?;
    println!("🗑  Token discarded for {domain}");
    Ok(())
}

/// Handle `cpa reset`.
pub fn handle_reset(provider: &CpaProvider) -> Result<()> {
    provider.reset()?;
    println!("Identity and tokens removed for {}", provider.authorization_provider_url());
    Ok(())
}

fn status_label(token: &Token) -> String {
    if token.is_expired() {
        format!("expired {}", token.expiration_date.format("%Y-%m-%d %H:%M UTC"))
    } else {
        format!("valid until {}", token.expiration_date.format("%Y-%m-%d %H:%M UTC"))
    }
}

fn print_token(token: &Token) {
    println!("   Domain: {}", token.domain);
    if let Some(name) = &token.domain_name {
        println!("   Name:   {name}");
    }
    println!("   Type:   {}", token.token_type);
    if let Some(user) = &token.user_name {
        println!("   User:   {user}");
    }
    println!("   Token:  {}", token.value);
    println!("   Status: {}", status_label(token));
}
