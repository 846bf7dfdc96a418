//! Sync engine facade: identity lifecycle, commands and store access.
//!
//! [`CaseSync`] ties the pieces together. Signing in resolves the identity's
//! topic, resets the store for the new `(role, identifier)` session and
//! starts a [`Subscription`]. Signing in as someone else, or signing out,
//! first closes the previous subscription and waits for it to stop, so no
//! late message from the old topic can reach the new session's store.
//!
//! Commands (`create_case`, `submit_decision`) never touch the store: the
//! resulting record arrives on the push channel like any other update.
//! `fetch_cases_for_subject` registers with the session loop before reading,
//! then hands its results over to be merged through the same reconciliation
//! path as pushes. Records pushed while the read was in flight are kept.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::api::{ApiError, CaseApi, DecisionRequest, HttpCaseApi, NewCaseRequest};
use crate::channel::resolve_topic;
use crate::config::{ReconnectPolicy, SyncConfig};
use crate::connection::{ConnectionState, Subscription};
use crate::models::{Case, Decision, Identity};
use crate::store::{CaseStore, CaseStoreReader};
use crate::transport::{CaseTransport, TransportError, WsTransport};

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Case service client: {0}")]
    Api(#[from] ApiError),
    #[error("Push transport: {0}")]
    Transport(#[from] TransportError),
}

/// The signed-in identity and its subscription, if its role has one.
struct ActiveSession {
    identity: Identity,
    subscription: Option<Subscription>,
}

pub struct CaseSync<A: CaseApi, T: CaseTransport> {
    api: Arc<A>,
    transport: Arc<T>,
    policy: ReconnectPolicy,
    store: CaseStore,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    active: Mutex<Option<ActiveSession>>,
}

impl CaseSync<HttpCaseApi, WsTransport> {
    /// Client wired to the real case service.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SetupError> {
        let api = HttpCaseApi::new(&config.api_url, config.http_timeout_secs)?;
        let transport = WsTransport::new(&config.ws_url)?;
        Ok(Self::new(api, transport, config.reconnect.clone()))
    }
}

impl<A: CaseApi, T: CaseTransport> CaseSync<A, T> {
    pub fn new(api: A, transport: T, policy: ReconnectPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            api: Arc::new(api),
            transport: Arc::new(transport),
            policy,
            store: CaseStore::new(),
            state_tx: Arc::new(state_tx),
            active: Mutex::new(None),
        }
    }

    pub fn store(&self) -> CaseStoreReader {
        self.store.reader()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Identity currently signed in, if any.
    pub async fn identity(&self) -> Option<Identity> {
        self.active.lock().await.as_ref().map(|s| s.identity.clone())
    }

    /// Make `identity` the active session.
    ///
    /// Re-signing the same identity keeps the running subscription.
    /// Identities without a resolvable topic get an empty, idle store.
    pub async fn sign_in(&self, identity: Identity) {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|s| s.identity.same_session(&identity)) {
            return;
        }
        if let Some(previous) = active.take() {
            self.teardown(previous).await;
        }

        let key = identity.session_key();
        let topic = resolve_topic(&identity);
        let subscription = match (key, topic) {
            (Some(key), Some(topic)) => {
                tracing::info!(session = %key, %topic, "Signing in");
                let writer = self.store.reset(Some(key.clone()), true);
                self.state_tx.send_replace(ConnectionState::Idle);
                Some(Subscription::start(
                    key,
                    topic,
                    Arc::clone(&self.api),
                    Arc::clone(&self.transport),
                    writer,
                    self.policy.clone(),
                    Arc::clone(&self.state_tx),
                ))
            }
            (key, _) => {
                tracing::warn!(
                    user_id = %identity.user_id,
                    role = %identity.role,
                    "No push topic for identity; staying unsubscribed"
                );
                self.store.reset(key, false);
                self.state_tx.send_replace(ConnectionState::Idle);
                None
            }
        };

        *active = Some(ActiveSession {
            identity,
            subscription,
        });
    }

    /// End the active session. The subscription is closed and the store emptied.
    pub async fn sign_out(&self) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.teardown(previous).await;
            self.store.reset(None, false);
        }
    }

    async fn teardown(&self, session: ActiveSession) {
        tracing::info!(user_id = %session.identity.user_id, "Closing session");
        if let Some(subscription) = session.subscription {
            subscription.close().await;
        }
        self.state_tx.send_replace(ConnectionState::Closed);
    }

    /// Originate a new case. The store is updated by the push that follows.
    pub async fn create_case(
        &self,
        provider_id: &str,
        patient_id: &str,
        procedure_code: &str,
    ) -> Result<Case, ApiError> {
        self.api
            .create_case(&NewCaseRequest::new(provider_id, patient_id, procedure_code))
            .await
    }

    /// Finalize a case. The store is updated by the push that follows.
    pub async fn submit_decision(
        &self,
        case_id: &str,
        decision: Decision,
        notes: &str,
    ) -> Result<Case, ApiError> {
        self.api
            .submit_decision(&DecisionRequest::new(case_id, decision, notes))
            .await
    }

    /// Read a subject's case history and merge it into the active session.
    ///
    /// Failures are returned to the caller and leave the store untouched.
    /// Results that come back after the session changed are not merged.
    pub async fn fetch_cases_for_subject(&self, subject_id: &str) -> Result<Vec<Case>, ApiError> {
        let ticket = {
            let active = self.active.lock().await;
            match active.as_ref().and_then(|s| s.subscription.as_ref()) {
                Some(subscription) => subscription.begin_backfill().await,
                None => None,
            }
        };

        let cases = match self.api.cases_by_subject(subject_id).await {
            Ok(cases) => cases,
            Err(e) => {
                tracing::warn!(subject_id, error = %e, "Subject case fetch failed");
                return Err(e);
            }
        };

        match ticket {
            Some(ticket) => {
                if !ticket.complete(cases.clone()) {
                    tracing::debug!(subject_id, "Session changed during fetch; not merging");
                }
            }
            None => tracing::debug!(subject_id, "No active subscription; backfill dropped"),
        }
        Ok(cases)
    }
}
