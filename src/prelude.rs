//! Convenience re-exports for common use.

pub use crate::auth::{CpaProvider, Token, TokenType, UserInteraction};
pub use crate::config::{CpaConfig, RefreshPolicy};
pub use crate::error::{CpaError, Result};
