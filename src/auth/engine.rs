//! Association and polling state machine.
//!
//! One [`NegotiationEngine`] drives one negotiation for one domain:
//!
//! ```text
//! Idle -> Registering -> Registered -> RequestingClientToken -> Done
//!                        Registered -> Associating -> Polling -> Done
//! Refreshing -> Done | Registered (fallback)
//! ```
//!
//! Nothing is resumed across restarts; an interrupted negotiation starts over.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::identity::{Identity, IdentityStore};
use super::interaction::{PresentationOutcome, UserInteraction, VerificationPrompt};
use super::request::{self, UserCode};
use super::token::{Token, TokenType};
use crate::config::RefreshPolicy;
use crate::error::{CpaError, Result};
use crate::transport::Transport;

/// Added to the polling interval on every `slow_down` answer.
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// Observable negotiation state.
#[derive(Debug, Clone)]
pub enum NegotiationState {
    Idle,
    Registering,
    Registered,
    RequestingClientToken,
    Associating,
    Polling { interval: Duration },
    Refreshing,
    Done(std::result::Result<Token, CpaError>),
}

impl NegotiationState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Software identification sent on registration.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_name: String,
    pub software_id: String,
    pub software_version: String,
}

/// Collaborators shared by every engine of a provider.
#[derive(Clone)]
pub struct EngineContext {
    pub provider_url: Url,
    pub transport: Arc<dyn Transport>,
    pub identities: IdentityStore,
    pub interaction: Arc<dyn UserInteraction>,
    pub client_info: ClientInfo,
    pub refresh_policy: RefreshPolicy,
}

/// User-mode association in progress. Never persisted.
#[derive(Debug, Clone)]
pub struct PendingAssociation {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: Url,
    pub polling_interval: Duration,
    pub expires_at: DateTime<Utc>,
    deadline: Instant,
}

impl PendingAssociation {
    fn new(code: UserCode) -> Result<Self> {
        let out_of_range = || {
            CpaError::InvalidResponse(format!(
                "association lifetime of {}s is out of range",
                code.expires_in_secs
            ))
        };
        let lifetime_secs = code.expires_in_secs.max(0);
        let expires_at = chrono::Duration::try_seconds(lifetime_secs)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(out_of_range)?;
        let deadline = Instant::now()
            .checked_add(Duration::from_secs(lifetime_secs as u64))
            .ok_or_else(out_of_range)?;
        Ok(Self {
            device_code: code.device_code,
            user_code: code.user_code,
            verification_url: code.verification_url,
            polling_interval: Duration::from_secs(code.interval_secs),
            expires_at,
            deadline,
        })
    }

    /// When to poll next: one interval from `now`, never past the deadline.
    fn next_wake(&self, now: Instant, interval: Duration) -> Instant {
        now.checked_add(interval)
            .map_or(self.deadline, |wake| wake.min(self.deadline))
    }

    fn prompt(&self, domain: &str) -> VerificationPrompt {
        VerificationPrompt {
            domain: domain.to_string(),
            verification_url: self.verification_url.clone(),
            user_code: self.user_code.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Drives a single negotiation for one domain.
pub struct NegotiationEngine {
    domain: String,
    context: EngineContext,
    cancel: CancellationToken,
    state_tx: watch::Sender<NegotiationState>,
}

impl NegotiationEngine {
    pub fn new(domain: impl Into<String>, context: EngineContext, cancel: CancellationToken) -> Self {
        let (state_tx, _) = watch::channel(NegotiationState::Idle);
        Self {
            domain: domain.into(),
            context,
            cancel,
            state_tx,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> NegotiationState {
        self.state_tx.borrow().clone()
    }

    /// Run a full negotiation for `token_type`, registering first if needed.
    pub async fn negotiate(&self, token_type: TokenType) -> Result<Token> {
        let result = self.run_negotiation(token_type).await;
        self.finish(result)
    }

    /// Refresh `stored`, keeping its domain and type.
    ///
    /// On failure the [`RefreshPolicy`] decides between a full negotiation of
    /// `token_type` and returning the refresh error.
    pub async fn refresh_or_negotiate(&self, stored: &Token, token_type: TokenType) -> Result<Token> {
        let result = match self.run_refresh(stored).await {
            Ok(token) => Ok(token),
            Err(CpaError::AuthorizationCancelled) => Err(CpaError::AuthorizationCancelled),
            Err(err) => match self.context.refresh_policy {
                RefreshPolicy::Surface => Err(err),
                RefreshPolicy::FallBackToNegotiation => {
                    tracing::info!(
                        domain = %self.domain,
                        error = %err,
                        "token refresh failed, starting a new negotiation"
                    );
                    self.run_negotiation(token_type).await
                }
            },
        };
        self.finish(result)
    }

    async fn run_negotiation(&self, token_type: TokenType) -> Result<Token> {
        let identity = self.ensure_identity().await?;
        match token_type {
            TokenType::Client => self.request_client_token(&identity).await,
            TokenType::User => {
                let pending = self.associate(&identity).await?;
                self.poll(&identity, pending).await
            }
        }
    }

    async fn run_refresh(&self, stored: &Token) -> Result<Token> {
        let identity = self.context.identities.get()?.ok_or_else(|| {
            CpaError::InvalidClient("no registered identity to refresh with".into())
        })?;
        self.transition(NegotiationState::Refreshing);
        let grant = self
            .cancellable(request::refresh_token(
                self.context.transport.as_ref(),
                &self.context.provider_url,
                &identity.identifier,
                &identity.secret,
                &self.domain,
            ))
            .await?;
        Token::issue(&stored.domain, stored.token_type, grant, Utc::now())
    }

    async fn ensure_identity(&self) -> Result<Identity> {
        if let Some(identity) = self.context.identities.get()? {
            self.transition(NegotiationState::Registered);
            return Ok(identity);
        }
        let _registering = self
            .cancellable(async { Ok(self.context.identities.lock_registration().await) })
            .await?;
        if let Some(identity) = self.context.identities.get()? {
            self.transition(NegotiationState::Registered);
            return Ok(identity);
        }
        self.transition(NegotiationState::Registering);
        let info = &self.context.client_info;
        let registration = self
            .cancellable(request::register_client(
                self.context.transport.as_ref(),
                &self.context.provider_url,
                &info.client_name,
                &info.software_id,
                &info.software_version,
            ))
            .await
            .map_err(|err| match err {
                CpaError::AuthorizationCancelled => err,
                other => CpaError::RegistrationFailed(Box::new(other)),
            })?;
        let identity = Identity::new(registration.client_id, registration.client_secret);
        self.context.identities.put(&identity)?;
        tracing::info!(client_id = %identity.identifier, "client registered");
        self.transition(NegotiationState::Registered);
        Ok(identity)
    }

    async fn request_client_token(&self, identity: &Identity) -> Result<Token> {
        self.transition(NegotiationState::RequestingClientToken);
        let grant = self
            .cancellable(request::request_token(
                self.context.transport.as_ref(),
                &self.context.provider_url,
                &identity.identifier,
                &identity.secret,
                &self.domain,
                None,
            ))
            .await?;
        Token::issue(&self.domain, TokenType::Client, grant, Utc::now())
    }

    async fn associate(&self, identity: &Identity) -> Result<PendingAssociation> {
        self.transition(NegotiationState::Associating);
        let code = self
            .cancellable(request::request_user_code(
                self.context.transport.as_ref(),
                &self.context.provider_url,
                &identity.identifier,
                &identity.secret,
                &self.domain,
            ))
            .await?;
        PendingAssociation::new(code)
    }

    async fn poll(&self, identity: &Identity, pending: PendingAssociation) -> Result<Token> {
        let prompt = pending.prompt(&self.domain);
        let mut interval = pending.polling_interval;
        self.transition(NegotiationState::Polling { interval });

        let presentation = self.context.interaction.present(&prompt);
        tokio::pin!(presentation);
        let mut presenting = true;
        let mut attempt: u32 = 0;

        let outcome = loop {
            let wake = pending.next_wake(Instant::now(), interval);
            let sleep = tokio::time::sleep_until(wake);
            tokio::pin!(sleep);
            let waited = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break Err(CpaError::AuthorizationCancelled),
                    shown = &mut presentation, if presenting => {
                        presenting = false;
                        if shown == PresentationOutcome::Dismissed {
                            tracing::info!(domain = %self.domain, "verification prompt dismissed");
                            break Err(CpaError::AuthorizationCancelled);
                        }
                    }
                    _ = &mut sleep => break Ok(()),
                }
            };
            if let Err(err) = waited {
                break Err(err);
            }
            if Instant::now() >= pending.deadline {
                break Err(CpaError::AuthorizationRequestExpired);
            }

            attempt += 1;
            tracing::debug!(
                domain = %self.domain,
                attempt,
                interval_secs = interval.as_secs(),
                "polling token endpoint"
            );
            let poll = request::request_token(
                self.context.transport.as_ref(),
                &self.context.provider_url,
                &identity.identifier,
                &identity.secret,
                &self.domain,
                Some(&pending.device_code),
            );
            let answer = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(CpaError::AuthorizationCancelled),
                _ = tokio::time::sleep_until(pending.deadline) => Err(CpaError::AuthorizationRequestExpired),
                answer = poll => answer,
            };
            match answer {
                Ok(grant) => break Token::issue(&self.domain, TokenType::User, grant, Utc::now()),
                Err(CpaError::PendingAuthorization) => continue,
                Err(CpaError::TooFast) => {
                    interval = interval.saturating_add(SLOW_DOWN_INCREMENT);
                    tracing::debug!(
                        domain = %self.domain,
                        interval_secs = interval.as_secs(),
                        "provider asked to slow down"
                    );
                    self.transition(NegotiationState::Polling { interval });
                }
                Err(err) => break Err(err),
            }
        };

        if presenting {
            self.context.interaction.close(&prompt).await;
        }
        outcome
    }

    async fn cancellable<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CpaError::AuthorizationCancelled),
            result = operation => result,
        }
    }

    fn transition(&self, state: NegotiationState) {
        tracing::debug!(domain = %self.domain, state = ?StateName(&state), "negotiation state changed");
        self.state_tx.send_replace(state);
    }

    fn finish(&self, result: Result<Token>) -> Result<Token> {
        match &result {
            Ok(token) => tracing::info!(
                domain = %self.domain,
                token_type = %token.token_type,
                expires = %token.expiration_date,
                "negotiation succeeded"
            ),
            Err(err) => tracing::warn!(domain = %self.domain, error = %err, "negotiation failed"),
        }
        self.transition(NegotiationState::Done(result.clone()));
        result
    }
}

/// Debug view of a state that never prints token values.
struct StateName<'a>(&'a NegotiationState);

impl std::fmt::Debug for StateName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            NegotiationState::Done(Ok(_)) => f.write_str("Done(Ok)"),
            NegotiationState::Done(Err(err)) => write!(f, "Done(Err({err}))"),
            other => write!(f, "{other:?}"),
        }
    }
}
