#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

// Network status encoding for transaction results. Fixed external contract.
pub const RAW_STATUS_NO_TRANSACTION: i32 = -1;
pub const RAW_STATUS_UNKNOWN: i32 = 0;
pub const RAW_STATUS_PENDING: i32 = 1;
pub const RAW_STATUS_FINALIZED: i32 = 2;
pub const RAW_STATUS_EXECUTED: i32 = 3;
pub const RAW_STATUS_SEALED: i32 = 4;
pub const RAW_STATUS_EXPIRED: i32 = 5;

pub const TRANSACTION_ID_MAX_LEN: usize = 128;
pub const TRANSACTION_SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxPhase {
    None,
    PendingApproval,
    Submitted,
    Finalized,
    Executed,
    Sealed,
    Expired,
    Error,
}

impl TxPhase {
    pub const fn from_raw_status(raw: i32) -> Self {
        match raw {
            i32::MIN..=-1 => Self::PendingApproval,
            RAW_STATUS_UNKNOWN | RAW_STATUS_PENDING => Self::Submitted,
            RAW_STATUS_FINALIZED => Self::Finalized,
            RAW_STATUS_EXECUTED => Self::Executed,
            RAW_STATUS_SEALED => Self::Sealed,
            RAW_STATUS_EXPIRED => Self::Expired,
            _ => Self::Error,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sealed | Self::Expired | Self::Error)
    }

    /// Phases reachable from any non-terminal phase.
    pub const fn is_absorbing(self) -> bool {
        matches!(self, Self::Expired | Self::Error)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::PendingApproval => 1,
            Self::Submitted => 2,
            Self::Finalized => 3,
            Self::Executed => 4,
            Self::Sealed => 5,
            Self::Expired | Self::Error => 6,
        }
    }

    /// Whether a handle sitting in `self` may move to `next`.
    /// Equal phases are duplicates and do not count as an advance.
    pub const fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_absorbing() {
            return true;
        }
        next.rank() > self.rank()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Submitted => "SUBMITTED",
            Self::Finalized => "FINALIZED",
            Self::Executed => "EXECUTED",
            Self::Sealed => "SEALED",
            Self::Expired => "EXPIRED",
            Self::Error => "ERROR",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "Idle",
            Self::PendingApproval => "Initializing",
            Self::Submitted => "Pending",
            Self::Finalized => "Finalized",
            Self::Executed => "Executed",
            Self::Sealed => "Sealed",
            Self::Expired => "Expired",
            Self::Error => "Error",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::None => "No active transaction.",
            Self::PendingApproval => "Waiting for transaction approval.",
            Self::Submitted => {
                "The transaction has been received by a collector but not yet finalized in a block."
            }
            Self::Finalized => {
                "The consensus nodes have finalized the block that the transaction is included in."
            }
            Self::Executed => "The execution nodes have produced a result for the transaction.",
            Self::Sealed => {
                "The verification nodes have verified the transaction, and the seal is included in the latest block."
            }
            Self::Expired => "The transaction was submitted past its expiration block height.",
            Self::Error => "The network reported an unrecognized transaction status.",
        }
    }

    /// `None` renders as an indeterminate progress bar.
    pub const fn progress_percent(self) -> Option<u8> {
        match self {
            Self::Finalized | Self::Executed => Some(80),
            Self::Sealed => Some(100),
            _ => None,
        }
    }
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier issued by the chain transport for a submitted mutation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = Self(raw.into());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short_id(&self) -> &str {
        match self.0.char_indices().nth(TRANSACTION_SHORT_ID_LEN) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl Validate for TransactionId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "transaction_id",
                reason: "must not be empty",
            });
        }
        if self.0.len() > TRANSACTION_ID_MAX_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "transaction_id",
                reason: "must be <= 128 bytes",
            });
        }
        if self.0.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ContractViolation::InvalidValue {
                field: "transaction_id",
                reason: "must not contain whitespace or control chars",
            });
        }
        Ok(())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TransactionId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TransactionId> for String {
    fn from(value: TransactionId) -> Self {
        value.0
    }
}

/// Names one tracked handle. Issued in increasing order by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubmissionTicket(pub u64);

/// One push from the network's status stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatusUpdate {
    pub status: i32,
    pub error_message: Option<String>,
}

impl TxStatusUpdate {
    pub fn new(status: i32) -> Self {
        Self {
            status,
            error_message: None,
        }
    }

    pub fn with_error(status: i32, error_message: impl Into<String>) -> Self {
        Self {
            status,
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub ticket: Option<SubmissionTicket>,
    pub phase: TxPhase,
    pub transaction_id: Option<TransactionId>,
    pub in_progress: bool,
}

impl TransactionSnapshot {
    pub fn idle() -> Self {
        Self {
            ticket: None,
            phase: TxPhase::None,
            transaction_id: None,
            in_progress: false,
        }
    }
}

/// Render-ready banner state for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    pub phase: TxPhase,
    pub transaction_id: Option<TransactionId>,
    pub in_progress: bool,
    pub label: String,
    pub description: String,
    pub progress_percent: Option<u8>,
    pub explorer_url: Option<String>,
    pub short_id: Option<String>,
}

impl TransactionView {
    pub fn from_snapshot(snapshot: &TransactionSnapshot, explorer_base: &str) -> Self {
        let base = explorer_base.trim_end_matches('/');
        Self {
            phase: snapshot.phase,
            transaction_id: snapshot.transaction_id.clone(),
            in_progress: snapshot.in_progress,
            label: snapshot.phase.label().to_string(),
            description: snapshot.phase.description().to_string(),
            progress_percent: snapshot.phase.progress_percent(),
            explorer_url: snapshot
                .transaction_id
                .as_ref()
                .map(|id| format!("{base}/transaction/{id}")),
            short_id: snapshot
                .transaction_id
                .as_ref()
                .map(|id| id.short_id().to_string()),
        }
    }
}
