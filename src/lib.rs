//! CPA: Cross-Platform Authentication client.
//!
//! Obtains and caches access tokens from a CPA authorization provider. A
//! client either registers anonymously and receives a client token, or pairs
//! with a user account through a verification page and polls until the user
//! grants or denies the request.
//!
//! # Quick Start
//!
//! ```no_run
//! use cpa::prelude::*;
//!
//! # async fn example() -> cpa::error::Result<()> {
//! let provider = CpaProvider::new(CpaConfig::from_env()?)?;
//! let token = provider.request_token("playlist.example.org", TokenType::User).await?;
//! println!("{} expires {}", token.value, token.expiration_date);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod prelude;
pub mod storage;
pub mod transport;

#[cfg(feature = "cli")]
pub mod cli;
