use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use reqwest::Url;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::engine::{ClientInfo, EngineContext, NegotiationEngine, NegotiationState};
use super::identity::{Identity, IdentityStore};
use super::interaction::{TracingPresenter, UserInteraction};
use super::store::TokenStore;
use super::token::{Token, TokenType};
use crate::config::CpaConfig;
use crate::error::{CpaError, Result};
use crate::storage::{FileSecureStorage, SecureStorage};
use crate::transport::{HttpTransport, Transport};

static DEFAULT_PROVIDER: RwLock<Option<Arc<CpaProvider>>> = RwLock::new(None);

struct InFlight {
    cancel: CancellationToken,
    state: watch::Receiver<NegotiationState>,
}

/// Cross-platform authentication provider.
///
/// Owns the identity registered with one authorization provider and the
/// tokens obtained through it. At most one negotiation runs per domain;
/// different domains negotiate concurrently.
///
/// # Example
/// ```no_run
/// use cpa::auth::{CpaProvider, TokenType};
/// use cpa::config::CpaConfig;
///
/// # async fn example() -> cpa::error::Result<()> {
/// let provider = CpaProvider::new(CpaConfig::from_env()?)?;
/// let token = match provider.token_for_domain("playlist.example.org")? {
///     Some(token) if !token.is_expired() => token,
///     _ => provider.request_token("playlist.example.org", TokenType::Client).await?,
/// };
/// println!("{}", token.value);
/// # Ok(())
/// # }
/// ```
pub struct CpaProvider {
    context: EngineContext,
    tokens: TokenStore,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl fmt::Debug for CpaProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpaProvider")
            .field("authorization_provider_url", &self.context.provider_url.as_str())
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl CpaProvider {
    /// Provider with file storage under `config.storage_dir`, an HTTP
    /// transport and [`TracingPresenter`] prompts. Swap the presenter with
    /// [`Self::with_interaction`].
    pub fn new(config: CpaConfig) -> Result<Self> {
        let storage = Arc::new(FileSecureStorage::new(config.storage_dir.clone()));
        let transport = Arc::new(HttpTransport::new(config.http_timeout)?);
        Ok(Self::from_parts(
            config,
            storage,
            transport,
            Arc::new(TracingPresenter),
        ))
    }

    pub fn from_parts(
        config: CpaConfig,
        storage: Arc<dyn SecureStorage>,
        transport: Arc<dyn Transport>,
        interaction: Arc<dyn UserInteraction>,
    ) -> Self {
        let group = config.access_group.as_deref();
        let identities = IdentityStore::new(
            storage.clone(),
            config.authorization_provider_url.as_str(),
            group,
        );
        let tokens = TokenStore::new(storage, group);
        Self {
            context: EngineContext {
                provider_url: config.authorization_provider_url,
                transport,
                identities,
                interaction,
                client_info: ClientInfo {
                    client_name: config.client_name,
                    software_id: config.software_id,
                    software_version: config.software_version,
                },
                refresh_policy: config.refresh_policy,
            },
            tokens,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_interaction(mut self, interaction: Arc<dyn UserInteraction>) -> Self {
        self.context.interaction = interaction;
        self
    }

    /// Install `provider` as the process-wide default, returning the previous one.
    pub fn set_default(provider: Option<Arc<CpaProvider>>) -> Option<Arc<CpaProvider>> {
        let mut slot = DEFAULT_PROVIDER
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, provider)
    }

    pub fn default_provider() -> Option<Arc<CpaProvider>> {
        DEFAULT_PROVIDER
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn authorization_provider_url(&self) -> &Url {
        &self.context.provider_url
    }

    pub fn identity(&self) -> Result<Option<Identity>> {
        self.context.identities.get()
    }

    /// Token stored locally for `domain`, expired or not.
    pub fn token_for_domain(&self, domain: &str) -> Result<Option<Token>> {
        self.tokens.get(domain)
    }

    /// Domains with a locally stored token.
    pub fn domains(&self) -> Result<Vec<String>> {
        self.tokens.domains()
    }

    /// Obtain a token of `token_type` for `domain` and store it, replacing
    /// whatever was stored before.
    ///
    /// An expired stored token of the same type is refreshed first.
    pub async fn request_token(&self, domain: &str, token_type: TokenType) -> Result<Token> {
        let (engine, _slot) = self.reserve(domain)?;
        let stored = self
            .tokens
            .get(domain)?
            .filter(|token| token.token_type == token_type && token.is_expired());
        let token = match stored {
            Some(stored) => engine.refresh_or_negotiate(&stored, token_type).await?,
            None => engine.negotiate(token_type).await?,
        };
        self.tokens.put(&token)?;
        Ok(token)
    }

    /// Refresh the stored token for `domain`, keeping its type.
    pub async fn refresh_token(&self, domain: &str) -> Result<Token> {
        let (engine, _slot) = self.reserve(domain)?;
        let stored = self.tokens.get(domain)?.ok_or_else(|| {
            CpaError::InvalidRequest(format!("no token stored for domain {domain}"))
        })?;
        let token = engine
            .refresh_or_negotiate(&stored, stored.token_type)
            .await?;
        self.tokens.put(&token)?;
        Ok(token)
    }

    /// Remove the stored token for `domain`, if any.
    pub fn discard_token(&self, domain: &str) -> Result<()> {
        self.tokens.delete(domain)
    }

    /// Cancel the negotiation running for `domain`.
    ///
    /// Returns `false` when nothing was in flight.
    pub fn cancel(&self, domain: &str) -> bool {
        match self.slots().get(domain) {
            Some(flight) => {
                flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self, domain: &str) -> bool {
        self.slots().contains_key(domain)
    }

    /// Watch the state of the negotiation running for `domain`.
    pub fn watch(&self, domain: &str) -> Option<watch::Receiver<NegotiationState>> {
        self.slots().get(domain).map(|flight| flight.state.clone())
    }

    /// Cancel everything in flight, then forget the identity and all tokens.
    pub fn reset(&self) -> Result<()> {
        for flight in self.slots().values() {
            flight.cancel.cancel();
        }
        self.tokens.clear()?;
        self.context.identities.clear()?;
        tracing::info!(provider = %self.context.provider_url, "local identity and tokens removed");
        Ok(())
    }

    fn reserve(&self, domain: &str) -> Result<(NegotiationEngine, SlotGuard<'_>)> {
        if domain.trim().is_empty() {
            return Err(CpaError::InvalidRequest("domain must not be empty".into()));
        }
        let mut slots = self.slots();
        if slots.contains_key(domain) {
            tracing::debug!(domain, "rejecting concurrent token request");
            return Err(CpaError::RequestAlreadyInProgress {
                domain: domain.to_string(),
            });
        }
        let cancel = CancellationToken::new();
        let engine = NegotiationEngine::new(domain, self.context.clone(), cancel.clone());
        slots.insert(
            domain.to_string(),
            InFlight {
                cancel,
                state: engine.subscribe(),
            },
        );
        Ok((
            engine,
            SlotGuard {
                provider: self,
                domain: domain.to_string(),
            },
        ))
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the in-flight slot even when the request future is dropped.
struct SlotGuard<'a> {
    provider: &'a CpaProvider,
    domain: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(flight) = self.provider.slots().remove(&self.domain) {
            flight.cancel.cancel();
        }
    }
}
