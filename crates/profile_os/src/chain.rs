#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use profile_kernel_contracts::chain::{ChainArg, ChainMutation, ChainQuery, ProfileProgram};
use profile_kernel_contracts::identity::AccountAddress;
use profile_kernel_contracts::profile::ProfileRecord;
use profile_kernel_contracts::txlife::{
    TransactionId, TxStatusUpdate, RAW_STATUS_EXECUTED, RAW_STATUS_FINALIZED,
    RAW_STATUS_PENDING, RAW_STATUS_SEALED,
};
use profile_kernel_contracts::{ContractViolation, Validate};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::lock;

/// Status pushes for one transaction. The stream may be empty or never end;
/// dropping the receiver unsubscribes.
pub type TxStatusStream = mpsc::UnboundedReceiver<TxStatusUpdate>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ContractViolation),
}

#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// Runs a read-only script. `Ok(None)` when the script returned nothing.
    async fn query(&self, query: &ChainQuery) -> Result<Option<Value>, TransportError>;

    /// Signs and submits a transaction, returning the network-issued id.
    async fn mutate(&self, mutation: &ChainMutation) -> Result<TransactionId, TransportError>;

    fn subscribe_transaction(&self, id: &TransactionId) -> Result<TxStatusStream, TransportError>;
}

pub const LOOPBACK_DEFAULT_NAME: &str = "Anon";
pub const LOOPBACK_DEFAULT_COLOR: &str = "#000000";
pub const LOOPBACK_DEFAULT_INFO: &str = "";

pub fn default_status_script() -> Vec<TxStatusUpdate> {
    [
        RAW_STATUS_PENDING,
        RAW_STATUS_FINALIZED,
        RAW_STATUS_EXECUTED,
        RAW_STATUS_SEALED,
    ]
    .into_iter()
    .map(TxStatusUpdate::new)
    .collect()
}

struct LoopbackState {
    profiles: BTreeMap<AccountAddress, ProfileRecord>,
    next_tx: u64,
    status_script: Vec<TxStatusUpdate>,
    reject_next_submit: Option<String>,
    hold_streams_open: bool,
    submitted: BTreeMap<TransactionId, Vec<TxStatusUpdate>>,
    open_streams: BTreeMap<TransactionId, Vec<mpsc::UnboundedSender<TxStatusUpdate>>>,
}

/// In-memory chain that executes the profile programs against a per-address
/// table and replays a scripted status sequence for every submission.
pub struct LoopbackChain {
    state: Mutex<LoopbackState>,
    query_calls: AtomicUsize,
    mutate_calls: AtomicUsize,
}

impl LoopbackChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                profiles: BTreeMap::new(),
                next_tx: 1,
                status_script: default_status_script(),
                reject_next_submit: None,
                hold_streams_open: false,
                submitted: BTreeMap::new(),
                open_streams: BTreeMap::new(),
            }),
            query_calls: AtomicUsize::new(0),
            mutate_calls: AtomicUsize::new(0),
        }
    }

    /// Raw codes replayed, in order, to every later subscriber.
    pub fn set_status_script(&self, raw: &[i32]) {
        lock(&self.state).status_script = raw.iter().copied().map(TxStatusUpdate::new).collect();
    }

    /// The next `mutate` fails with `TransportError::Rejected(reason)`.
    pub fn reject_next_submission(&self, reason: impl Into<String>) {
        lock(&self.state).reject_next_submit = Some(reason.into());
    }

    /// Keep status streams open after the script drains so tests can push by hand.
    pub fn hold_streams_open(&self, hold: bool) {
        lock(&self.state).hold_streams_open = hold;
    }

    /// Returns the number of open streams the update reached.
    pub fn push_status(&self, id: &TransactionId, update: TxStatusUpdate) -> usize {
        let mut state = lock(&self.state);
        let Some(senders) = state.open_streams.get_mut(id) else {
            return 0;
        };
        senders.retain(|tx| tx.send(update.clone()).is_ok());
        let reached = senders.len();
        if reached == 0 {
            state.open_streams.remove(id);
            state.submitted.remove(id);
        }
        reached
    }

    pub fn seed_profile(&self, record: ProfileRecord) {
        lock(&self.state)
            .profiles
            .insert(record.address.clone(), record);
    }

    pub fn profile(&self, address: &AccountAddress) -> Option<ProfileRecord> {
        lock(&self.state).profiles.get(address).cloned()
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn mutate_calls(&self) -> usize {
        self.mutate_calls.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.query_calls() + self.mutate_calls()
    }

    /// Submissions whose status script has not been replayed yet, or whose stream is held open.
    pub fn tracked_transactions(&self) -> usize {
        lock(&self.state).submitted.len()
    }
}

impl Default for LoopbackChain {
    fn default() -> Self {
        Self::new()
    }
}

fn string_arg(args: &[ChainArg], index: usize) -> Result<String, TransportError> {
    match args.get(index) {
        Some(ChainArg::String(s)) => Ok(s.clone()),
        _ => Err(TransportError::Rejected(format!(
            "argument {index} must be a String"
        ))),
    }
}

fn address_arg(args: &[ChainArg], index: usize) -> Result<&AccountAddress, TransportError> {
    match args.get(index) {
        Some(ChainArg::Address(a)) => Ok(a),
        _ => Err(TransportError::Rejected(format!(
            "argument {index} must be an Address"
        ))),
    }
}

fn execute(
    profiles: &mut BTreeMap<AccountAddress, ProfileRecord>,
    mutation: &ChainMutation,
) -> Result<(), String> {
    let signer = mutation.signer().clone();
    match mutation.program {
        ProfileProgram::CreateProfile => {
            profiles.entry(signer.clone()).or_insert_with(|| {
                ProfileRecord::v1(
                    signer,
                    LOOPBACK_DEFAULT_NAME.to_string(),
                    LOOPBACK_DEFAULT_COLOR.to_string(),
                    LOOPBACK_DEFAULT_INFO.to_string(),
                )
            });
            Ok(())
        }
        ProfileProgram::UpdateProfile => {
            let name = string_arg(&mutation.args, 0).map_err(|e| e.to_string())?;
            let color = string_arg(&mutation.args, 1).map_err(|e| e.to_string())?;
            let info = string_arg(&mutation.args, 2).map_err(|e| e.to_string())?;
            let Some(record) = profiles.get_mut(&signer) else {
                return Err("unexpectedly found nil while forcing an Optional value".to_string());
            };
            record.name = name;
            record.color = color;
            record.info = info;
            Ok(())
        }
        ProfileProgram::ReadProfile => Err("scripts cannot be submitted as transactions".to_string()),
    }
}

#[async_trait]
impl ChainTransport for LoopbackChain {
    async fn query(&self, query: &ChainQuery) -> Result<Option<Value>, TransportError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        query.validate()?;
        let address = address_arg(&query.args, 0)?;
        let record = lock(&self.state).profiles.get(address).cloned();
        record
            .map(|r| serde_json::to_value(r).map_err(|e| TransportError::Malformed(e.to_string())))
            .transpose()
    }

    async fn mutate(&self, mutation: &ChainMutation) -> Result<TransactionId, TransportError> {
        self.mutate_calls.fetch_add(1, Ordering::SeqCst);
        mutation.validate()?;
        let mut state = lock(&self.state);
        if let Some(reason) = state.reject_next_submit.take() {
            return Err(TransportError::Rejected(reason));
        }
        let id = TransactionId::new(format!("{:064x}", state.next_tx))?;
        state.next_tx = state.next_tx.saturating_add(1);
        let mut script = state.status_script.clone();
        if let Err(message) = execute(&mut state.profiles, mutation) {
            // A failed program still seals; the error rides on the final push.
            if let Some(last) = script.last_mut() {
                last.error_message = Some(message);
            }
        }
        tracing::debug!(tx_id = %id, program = mutation.program.as_str(), "loopback transaction accepted");
        state.submitted.insert(id.clone(), script);
        Ok(id)
    }

    fn subscribe_transaction(&self, id: &TransactionId) -> Result<TxStatusStream, TransportError> {
        let mut state = lock(&self.state);
        // Held mode keeps the script so a test can resubscribe; otherwise it is replayed once.
        let script = if state.hold_streams_open {
            state.submitted.get(id).cloned()
        } else {
            state.submitted.remove(id)
        };
        let Some(script) = script else {
            return Err(TransportError::Rejected(format!("unknown transaction {id}")));
        };
        let (tx, rx) = mpsc::unbounded_channel();
        for update in script {
            // The receiver is still held locally, so the send cannot fail.
            let _ = tx.send(update);
        }
        if state.hold_streams_open {
            state.open_streams.entry(id.clone()).or_default().push(tx);
        }
        Ok(rx)
    }
}
