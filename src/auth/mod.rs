//! Cross-platform authentication: identity registration, user association,
//! token polling and the domain-keyed token cache.

pub mod engine;
pub mod identity;
pub mod interaction;
pub mod provider;
pub mod request;
pub mod store;
pub mod token;

pub use engine::{NegotiationEngine, NegotiationState, PendingAssociation};
pub use identity::{Identity, IdentityStore};
pub use interaction::{PresentationOutcome, TracingPresenter, UserInteraction, VerificationPrompt};
pub use provider::CpaProvider;
pub use store::TokenStore;
pub use token::{Token, TokenType};
