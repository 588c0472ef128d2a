//! Terminal prompt for user-mode requests.

use async_trait::async_trait;

use crate::auth::{PresentationOutcome, UserInteraction, VerificationPrompt};

/// Prints the verification URL and user code on stderr, then lets polling
/// run to completion. Ctrl-C is the way out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePresenter;

#[async_trait]
impl UserInteraction for ConsolePresenter {
    async fn present(&self, prompt: &VerificationPrompt) -> PresentationOutcome {
        eprintln!("🔐 Visit: {}", prompt.verification_url);
        eprintln!("   Enter code: {}", prompt.user_code);
        eprintln!(
            "   Waiting for authorization of {} (expires {})...",
            prompt.domain,
            prompt.expires_at.format("%H:%M:%S UTC")
        );
        PresentationOutcome::Completed
    }
}
