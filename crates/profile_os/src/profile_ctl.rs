#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;

use profile_kernel_contracts::chain::{ChainMutation, ChainQuery};
use profile_kernel_contracts::identity::{AccountAddress, Identity};
use profile_kernel_contracts::profile::{ProfileDraft, ProfileRecord};
use profile_kernel_contracts::txlife::{
    SubmissionTicket, TransactionId, TransactionSnapshot, TransactionView, TxPhase,
};
use profile_kernel_contracts::{ContractViolation, Validate};
use profile_storage::{bind_profile_to_session, IdentityChange, ListenerId, ProfileStore, SessionStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use url::Url;

use crate::chain::{ChainTransport, TransportError, TxStatusStream};
use crate::identity::{IdentityError, IdentityProvider};
use crate::txlife::{
    reason_codes, AttachOutcome, SealedHook, StatusStep, TrackerError, TransactionTracker,
};

pub const DEFAULT_CONTRACT_ADDRESS: &str = "0xf8d6e0586b0a20c7";
pub const DEFAULT_EXPLORER_BASE: &str = "https://testnet.flowscan.org";

pub const MESSAGE_GET_STARTED: &str = "Get started by logging in or signing up.";
pub const MESSAGE_CREATE_PROFILE: &str = "Create a profile on the blockchain.";
pub const MESSAGE_PROFILE_LIVES: &str = "Your Profile lives on the blockchain.";

pub fn landing_message(identity: &Identity, profile_exists: bool) -> &'static str {
    match (identity.logged_in, profile_exists) {
        (false, _) => MESSAGE_GET_STARTED,
        (true, false) => MESSAGE_CREATE_PROFILE,
        (true, true) => MESSAGE_PROFILE_LIVES,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileControllerConfig {
    pub contract_address: AccountAddress,
    pub explorer_base: String,
}

impl ProfileControllerConfig {
    pub fn mvp_emulator_v1() -> Result<Self, ContractViolation> {
        Self::from_env_lookup(|_| None)
    }

    pub fn from_env() -> Result<Self, ContractViolation> {
        Self::from_env_lookup(|key| env::var(key).ok())
    }

    pub fn from_env_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ContractViolation> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let contract_address = AccountAddress::new(
            non_empty("PROFILE_CONTRACT_ADDRESS")
                .unwrap_or_else(|| DEFAULT_CONTRACT_ADDRESS.to_string()),
        )?;
        let explorer_base = non_empty("PROFILE_EXPLORER_BASE")
            .unwrap_or_else(|| DEFAULT_EXPLORER_BASE.to_string());
        match Url::parse(&explorer_base) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ContractViolation::InvalidValue {
                    field: "profile_controller_config.explorer_base",
                    reason: "must be an http(s) url",
                })
            }
        }
        Ok(Self {
            contract_address,
            explorer_base,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileActionError {
    #[error("log in first")]
    AuthRequired,
    #[error("create a profile first")]
    ProfileRequired,
    #[error("invalid profile input: {0}")]
    Validation(#[from] ContractViolation),
    #[error("a transaction is already in flight")]
    Busy,
    #[error("transaction submission failed: {0}")]
    SubmitFailed(TransportError),
    #[error("transaction tracker misuse: {0}")]
    TrackerMisuse(&'static str),
    #[error("profile query failed: {0}")]
    QueryFailed(TransportError),
    #[error("identity provider failed: {0}")]
    IdentityFailed(IdentityError),
}

impl ProfileActionError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::ProfileRequired => "PROFILE_REQUIRED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Busy => "BUSY",
            Self::SubmitFailed(_) => "SUBMIT_FAILED",
            Self::TrackerMisuse(_) => "TRACKER_MISUSE",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::IdentityFailed(_) => "IDENTITY_FAILED",
        }
    }
}

impl From<TrackerError> for ProfileActionError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Busy { .. } => Self::Busy,
            TrackerError::Misuse(what) => Self::TrackerMisuse(what),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingEnd {
    Terminal,
    Dismissed,
    StreamClosed,
    SubscribeFailed(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingOutcome {
    pub ticket: SubmissionTicket,
    pub final_phase: TxPhase,
    pub updates_seen: usize,
    /// A profile read completed after the sealed hook fired.
    pub reloaded: bool,
    pub end: TrackingEnd,
}

#[derive(Debug)]
pub struct SubmissionReceipt {
    pub ticket: SubmissionTicket,
    pub transaction_id: TransactionId,
    pub tracking: JoinHandle<TrackingOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub identity: Identity,
    pub profile: Option<ProfileRecord>,
    pub profile_exists: bool,
    pub profile_loaded: bool,
    pub transaction: TransactionView,
    pub message: String,
}

/// Orchestrates profile actions for one client.
///
/// Submissions run through the tracker: begin (BUSY if a handle is still
/// pending), submit, attach the id, then forward status pushes from a spawned
/// tracking task. The first SEALED push reloads the profile for the signer.
pub struct ProfileController {
    config: ProfileControllerConfig,
    session: Arc<SessionStore>,
    profile: Arc<ProfileStore>,
    tracker: TransactionTracker,
    chain: Arc<dyn ChainTransport>,
    identity: Arc<dyn IdentityProvider>,
    login_load: Mutex<()>,
    session_binding: ListenerId,
}

impl ProfileController {
    pub fn new(
        config: ProfileControllerConfig,
        chain: Arc<dyn ChainTransport>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Arc<Self> {
        let session = Arc::new(SessionStore::new());
        let profile = Arc::new(ProfileStore::new());
        let session_binding = bind_profile_to_session(&session, profile.clone());
        Arc::new(Self {
            config,
            session,
            profile,
            tracker: TransactionTracker::new(),
            chain,
            identity,
            login_load: Mutex::new(()),
            session_binding,
        })
    }

    pub fn config(&self) -> &ProfileControllerConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn profile(&self) -> &Arc<ProfileStore> {
        &self.profile
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    pub fn view_state(&self) -> ViewState {
        let identity = self.session.current();
        let profile = self.profile.snapshot();
        let transaction =
            TransactionView::from_snapshot(&self.tracker.snapshot(), &self.config.explorer_base);
        ViewState {
            message: landing_message(&identity, profile.exists).to_string(),
            identity,
            profile: profile.record,
            profile_exists: profile.exists,
            profile_loaded: profile.loaded,
            transaction,
        }
    }

    pub fn dismiss_transaction(&self) {
        self.tracker.reset();
    }

    pub async fn log_in(&self) -> Result<Identity, ProfileActionError> {
        self.identity
            .log_in()
            .await
            .map_err(ProfileActionError::IdentityFailed)?;
        Ok(self.sync_identity().await)
    }

    pub async fn sign_up(&self) -> Result<Identity, ProfileActionError> {
        self.identity
            .sign_up()
            .await
            .map_err(ProfileActionError::IdentityFailed)?;
        Ok(self.sync_identity().await)
    }

    pub async fn log_out(&self) -> Result<(), ProfileActionError> {
        self.identity
            .unauthenticate()
            .await
            .map_err(ProfileActionError::IdentityFailed)?;
        self.session.log_out();
        Ok(())
    }

    /// Writes one identity push into the session and loads the profile when a
    /// logged-in identity has none loaded yet. Load failures are logged only.
    pub async fn ingest_identity(&self, identity: Identity) -> IdentityChange {
        let change = self.session.set_identity(identity);
        // The pump and a direct login can ingest the same identity at once.
        let _loading = self.login_load.lock().await;
        let current = self.session.current();
        if let Some(address) = current.active_address() {
            if !self.profile.is_loaded() {
                if let Err(err) = self.load_profile_for(address).await {
                    tracing::warn!(address = %address, %err, "profile load after login failed");
                }
            }
        }
        change
    }

    pub async fn run_identity_pump(self: Arc<Self>, mut current_user: watch::Receiver<Identity>) {
        loop {
            let identity = current_user.borrow_and_update().clone();
            self.ingest_identity(identity).await;
            if current_user.changed().await.is_err() {
                tracing::debug!("identity stream closed; pump stopped");
                break;
            }
        }
    }

    pub fn spawn_identity_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let current_user = self.identity.subscribe_current_user();
        tokio::spawn(Arc::clone(self).run_identity_pump(current_user))
    }

    pub async fn load_profile(&self) -> Result<Option<ProfileRecord>, ProfileActionError> {
        let address = self.require_address()?;
        self.load_profile_for(&address).await
    }

    pub async fn create_profile(
        self: &Arc<Self>,
    ) -> Result<SubmissionReceipt, ProfileActionError> {
        let signer = self.require_address()?;
        let mutation = ChainMutation::create_profile(&self.config.contract_address, &signer);
        self.submit(mutation).await
    }

    pub async fn update_profile(
        self: &Arc<Self>,
        draft: ProfileDraft,
    ) -> Result<SubmissionReceipt, ProfileActionError> {
        let signer = self.require_address()?;
        if !self.profile.exists() {
            return Err(ProfileActionError::ProfileRequired);
        }
        draft.validate()?;
        let mutation =
            ChainMutation::update_profile(&self.config.contract_address, &signer, &draft);
        self.submit(mutation).await
    }

    fn require_address(&self) -> Result<AccountAddress, ProfileActionError> {
        self.session
            .current()
            .active_address()
            .cloned()
            .ok_or(ProfileActionError::AuthRequired)
    }

    async fn sync_identity(&self) -> Identity {
        let current = self.identity.subscribe_current_user().borrow().clone();
        self.ingest_identity(current).await;
        self.session.current()
    }

    async fn load_profile_for(
        &self,
        address: &AccountAddress,
    ) -> Result<Option<ProfileRecord>, ProfileActionError> {
        let query = ChainQuery::read_profile(&self.config.contract_address, address);
        let value = self
            .chain
            .query(&query)
            .await
            .map_err(ProfileActionError::QueryFailed)?;
        let record = ProfileRecord::from_query_value(value.unwrap_or(Value::Null)).map_err(|v| {
            ProfileActionError::QueryFailed(TransportError::Malformed(v.to_string()))
        })?;
        let session = &self.session;
        let written = self.profile.set_from_query_if(record.clone(), || {
            session.current().active_address() == Some(address)
        });
        if written {
            tracing::info!(address = %address, exists = record.is_some(), "profile loaded");
        } else {
            tracing::debug!(address = %address, "identity changed during profile load; result discarded");
        }
        Ok(record)
    }

    async fn submit(
        self: &Arc<Self>,
        mutation: ChainMutation,
    ) -> Result<SubmissionReceipt, ProfileActionError> {
        mutation.validate()?;
        let (sealed_tx, sealed_rx) = oneshot::channel::<TransactionSnapshot>();
        let hook: SealedHook = Box::new(move |snapshot: &TransactionSnapshot| {
            let _ = sealed_tx.send(snapshot.clone());
        });
        let ticket = self.tracker.begin_submission(Some(hook))?;
        let transaction_id = match self.chain.mutate(&mutation).await {
            Ok(id) => id,
            Err(err) => {
                self.tracker.abandon(ticket);
                tracing::warn!(
                    ticket = ticket.0,
                    program = mutation.program.as_str(),
                    %err,
                    "transaction submission failed"
                );
                return Err(ProfileActionError::SubmitFailed(err));
            }
        };
        if self.tracker.attach_id(ticket, transaction_id.clone())? == AttachOutcome::Stale {
            tracing::info!(ticket = ticket.0, tx_id = %transaction_id, "dismissed before the id arrived");
        }
        let stream = self.chain.subscribe_transaction(&transaction_id);
        let signer = mutation.signer().clone();
        let controller = Arc::clone(self);
        let tracking =
            tokio::spawn(async move { controller.track(ticket, signer, stream, sealed_rx).await });
        Ok(SubmissionReceipt {
            ticket,
            transaction_id,
            tracking,
        })
    }

    async fn track(
        &self,
        ticket: SubmissionTicket,
        signer: AccountAddress,
        stream: Result<TxStatusStream, TransportError>,
        mut sealed_rx: oneshot::Receiver<TransactionSnapshot>,
    ) -> TrackingOutcome {
        let mut outcome = TrackingOutcome {
            ticket,
            final_phase: TxPhase::PendingApproval,
            updates_seen: 0,
            reloaded: false,
            end: TrackingEnd::StreamClosed,
        };
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(ticket = ticket.0, %err, "status subscription failed; phase stays parked");
                outcome.end = TrackingEnd::SubscribeFailed(err);
                return outcome;
            }
        };
        let mut observed = self.tracker.watch();
        outcome.end = loop {
            if observed.borrow_and_update().ticket != Some(ticket) {
                break TrackingEnd::Dismissed;
            }
            tokio::select! {
                update = stream.recv() => {
                    let Some(update) = update else {
                        break TrackingEnd::StreamClosed;
                    };
                    outcome.updates_seen += 1;
                    if let Some(message) = &update.error_message {
                        tracing::warn!(ticket = ticket.0, status = update.status, %message, "transaction reported an error");
                    }
                    let step = self.tracker.on_status_update(ticket, update.status);
                    match step {
                        StatusStep::Advanced { to, .. } => outcome.final_phase = to,
                        StatusStep::Ignored { reason } if reason == reason_codes::TX_IGNORED_STALE_TICKET => {
                            break TrackingEnd::Dismissed;
                        }
                        StatusStep::Ignored { .. } => {}
                    }
                    if sealed_rx.try_recv().is_ok() {
                        outcome.reloaded = match self.load_profile_for(&signer).await {
                            Ok(_) => true,
                            Err(err) => {
                                tracing::warn!(ticket = ticket.0, %err, "profile reload after seal failed");
                                false
                            }
                        };
                    }
                    if step.reached_terminal() {
                        break TrackingEnd::Terminal;
                    }
                }
                changed = observed.changed() => {
                    if changed.is_err() {
                        break TrackingEnd::Dismissed;
                    }
                }
            }
        };
        tracing::debug!(
            ticket = ticket.0,
            end = ?outcome.end,
            phase = %outcome.final_phase,
            updates = outcome.updates_seen,
            "transaction tracking finished"
        );
        outcome
    }
}

impl Drop for ProfileController {
    fn drop(&mut self) {
        self.session.unsubscribe(self.session_binding);
    }
}
