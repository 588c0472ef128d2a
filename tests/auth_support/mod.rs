#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpa::auth::engine::{ClientInfo, EngineContext};
use cpa::auth::{
    CpaProvider, IdentityStore, PresentationOutcome, UserInteraction, VerificationPrompt,
};
use cpa::config::{CpaConfig, RefreshPolicy};
use cpa::error::{CpaError, Result};
use cpa::storage::{MemorySecureStorage, SecureStorage};
use cpa::transport::{Transport, TransportRequest, TransportResponse};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::time::Instant;

pub const PROVIDER_URL: &str = "https://cpa.example/ap/";

type Responder = Box<dyn Fn(&Value) -> Scripted + Send + Sync>;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Scripted {
    Json(u16, Value),
    /// Never answers.
    Hang,
    Fail(String),
}

/// A call observed by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: String,
    pub body: Value,
    pub at: Instant,
}

/// In-memory provider: answers per endpoint (last path segment) from a queue,
/// then from a repeating default.
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    repeating: Mutex<HashMap<String, Responder>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push(&self, endpoint: &str, answer: Scripted) -> &Self {
        self.queued
            .lock()
            .expect("script lock poisoned")
            .entry(endpoint.to_string())
            .or_default()
            .push_back(answer);
        self
    }

    pub fn push_json(&self, endpoint: &str, status: u16, body: Value) -> &Self {
        self.push(endpoint, Scripted::Json(status, body))
    }

    pub fn always(&self, endpoint: &str, answer: Scripted) -> &Self {
        self.respond_with(endpoint, move |_| answer.clone())
    }

    pub fn respond_with(
        &self,
        endpoint: &str,
        responder: impl Fn(&Value) -> Scripted + Send + Sync + 'static,
    ) -> &Self {
        self.repeating
            .lock()
            .expect("script lock poisoned")
            .insert(endpoint.to_string(), Box::new(responder));
        self
    }

    pub fn calls(&self, endpoint: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls(endpoint).len()
    }

    /// Most requests that were ever awaiting an answer at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_answer(&self, endpoint: &str, body: &Value) -> Scripted {
        if let Some(answer) = self
            .queued
            .lock()
            .expect("script lock poisoned")
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
        {
            return answer;
        }
        match self
            .repeating
            .lock()
            .expect("script lock poisoned")
            .get(endpoint)
        {
            Some(responder) => responder(body),
            None => Scripted::Json(500, json!({})),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let endpoint = request
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .unwrap_or_default();
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(RecordedCall {
                endpoint: endpoint.clone(),
                body: body.clone(),
                at: Instant::now(),
            });
        let answer = self.next_answer(&endpoint, &body);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match answer {
            Scripted::Json(status, body) => Ok(TransportResponse {
                status,
                headers: Vec::new(),
                body: serde_json::to_vec(&body).expect("serialize scripted body"),
            }),
            Scripted::Hang => std::future::pending().await,
            Scripted::Fail(message) => Err(CpaError::Transport(message)),
        }
    }
}

/// What a scripted presenter does once shown.
#[derive(Debug, Clone, Copy)]
pub enum PresenterBehavior {
    /// Returns `Completed` right away.
    Complete,
    /// Stays on screen until the negotiation ends.
    StayOpen,
    /// Returns `Dismissed` after the delay.
    DismissAfter(Duration),
}

pub struct ScriptedPresenter {
    behavior: PresenterBehavior,
    prompts: Mutex<Vec<VerificationPrompt>>,
    closed: AtomicUsize,
}

impl ScriptedPresenter {
    pub fn new(behavior: PresenterBehavior) -> Self {
        Self {
            behavior,
            prompts: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        }
    }

    pub fn prompts(&self) -> Vec<VerificationPrompt> {
        self.prompts.lock().expect("prompt lock poisoned").clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserInteraction for ScriptedPresenter {
    async fn present(&self, prompt: &VerificationPrompt) -> PresentationOutcome {
        self.prompts
            .lock()
            .expect("prompt lock poisoned")
            .push(prompt.clone());
        match self.behavior {
            PresenterBehavior::Complete => PresentationOutcome::Completed,
            PresenterBehavior::StayOpen => std::future::pending().await,
            PresenterBehavior::DismissAfter(delay) => {
                tokio::time::sleep(delay).await;
                PresentationOutcome::Dismissed
            }
        }
    }

    async fn close(&self, _prompt: &VerificationPrompt) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn provider_url() -> Url {
    Url::parse(PROVIDER_URL).expect("provider url")
}

pub fn config(policy: RefreshPolicy) -> CpaConfig {
    CpaConfig::builder()
        .authorization_provider_url(provider_url())
        .storage_dir("/nonexistent/cpa-tests")
        .client_name("test-client")
        .refresh_policy(policy)
        .build()
}

pub fn engine_context(
    transport: Arc<ScriptedTransport>,
    storage: Arc<dyn SecureStorage>,
    interaction: Arc<dyn UserInteraction>,
    refresh_policy: RefreshPolicy,
) -> EngineContext {
    EngineContext {
        provider_url: provider_url(),
        transport,
        identities: IdentityStore::new(storage, PROVIDER_URL, None),
        interaction,
        client_info: ClientInfo {
            client_name: "test-client".to_string(),
            software_id: "cpa-tests".to_string(),
            software_version: "0.0.0".to_string(),
        },
        refresh_policy,
    }
}

pub fn provider(
    transport: Arc<ScriptedTransport>,
    interaction: Arc<dyn UserInteraction>,
) -> (Arc<MemorySecureStorage>, CpaProvider) {
    provider_with_policy(transport, interaction, RefreshPolicy::FallBackToNegotiation)
}

pub fn provider_with_policy(
    transport: Arc<ScriptedTransport>,
    interaction: Arc<dyn UserInteraction>,
    policy: RefreshPolicy,
) -> (Arc<MemorySecureStorage>, CpaProvider) {
    let storage = Arc::new(MemorySecureStorage::new());
    let provider = CpaProvider::from_parts(config(policy), storage.clone(), transport, interaction);
    (storage, provider)
}

pub fn registration() -> Scripted {
    Scripted::Json(
        201,
        json!({"client_id": "client-1", "client_secret": "secret-1"}),
    )
}

pub fn user_code(interval: u64, expires_in: i64) -> Scripted {
    Scripted::Json(
        200,
        json!({
            "device_code": "device-1",
            "user_code": "ABCD-1234",
            "verification_uri": "https://cpa.example/verify",
            "interval": interval,
            "expires_in": expires_in
        }),
    )
}

pub fn client_token(value: &str, expires_in: i64) -> Scripted {
    Scripted::Json(
        200,
        json!({
            "access_token": value,
            "token_type": "bearer",
            "domain_name": "Example Service",
            "expires_in": expires_in
        }),
    )
}

pub fn user_token(value: &str, user_name: &str, expires_in: i64) -> Scripted {
    Scripted::Json(
        200,
        json!({
            "access_token": value,
            "token_type": "bearer",
            "domain_name": "Example Service",
            "user_name": user_name,
            "expires_in": expires_in
        }),
    )
}

pub fn provider_error(status: u16, identifier: &str) -> Scripted {
    Scripted::Json(status, json!({"error": identifier}))
}

pub fn pending() -> Scripted {
    Scripted::Json(202, json!({"reason": "authorization_pending"}))
}
