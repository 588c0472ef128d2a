use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;

/// What the user must see to approve a user-mode request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationPrompt {
    pub domain: String,
    pub verification_url: Url,
    pub user_code: String,
    pub expires_at: DateTime<Utc>,
}

/// How a presentation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationOutcome {
    /// The user went through the page; polling decides the result.
    Completed,
    /// The user closed the page before finishing. Cancels the negotiation.
    Dismissed,
}

/// Presents the verification URL and user code to a human.
///
/// `present` is polled alongside the token endpoint and may stay pending for
/// as long as the page is on screen.
#[async_trait]
pub trait UserInteraction: Send + Sync {
    async fn present(&self, prompt: &VerificationPrompt) -> PresentationOutcome;

    /// Called once the negotiation is over while the prompt may still be shown.
    async fn close(&self, _prompt: &VerificationPrompt) {}
}

/// Default presenter for library use: emits the prompt as a `tracing` event
/// and lets polling run to completion. Applications that show the code to a
/// person install their own [`UserInteraction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPresenter;

#[async_trait]
impl UserInteraction for TracingPresenter {
    async fn present(&self, prompt: &VerificationPrompt) -> PresentationOutcome {
        tracing::info!(
            domain = %prompt.domain,
            verification_url = %prompt.verification_url,
            user_code = %prompt.user_code,
            expires_at = %prompt.expires_at,
            "user verification required"
        );
        PresentationOutcome::Completed
    }
}
