//! Core data model: canonical events, accounts, ledger records, outcomes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Flat key→value mapping as received from a provider (query or body).
///
/// Ordered so that `raw_payload` audit snapshots serialize deterministically.
pub type RawFields = BTreeMap<String, String>;

/// Provider-agnostic form of one inbound postback, produced by the
/// field normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    /// Registry id of the provider that sent the notification.
    pub provider: String,
    /// Opaque end-user identifier.
    pub user_id: String,
    /// Provider-native transaction id, before any chargeback key derivation.
    pub external_txn_id: String,
    /// Amount exactly as received; parsed only after classification.
    pub raw_amount: String,
    /// Provider status token, e.g. `completed`, `pending`, `2`.
    pub status_token: String,
}

/// Composite deduplication key `(provider, external transaction id)`.
///
/// This is the sole key under which exactly-once semantics are enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnKey {
    pub provider: String,
    pub external_id: String,
}

impl TxnKey {
    pub fn new(provider: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            external_id: external_id.into(),
        }
    }
}

impl std::fmt::Display for TxnKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.external_id)
    }
}

/// Ledger transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnKind {
    Credit,
    Chargeback,
}

impl TxnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnKind::Credit => "credit",
            TxnKind::Chargeback => "chargeback",
        }
    }
}

impl std::str::FromStr for TxnKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TxnKind::Credit),
            "chargeback" => Ok(TxnKind::Chargeback),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// How a provider status token classified against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Credit,
    Chargeback,
    /// Pending or unrecognized token: acknowledge success, touch nothing.
    Ignore,
}

/// Per-user balance document.
///
/// Mutated exclusively inside a reconciliation commit; never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub user_id: String,
    pub balance: Decimal,
    /// Cumulative credited amount. Chargebacks never reduce it.
    pub total_earnings: Decimal,
    pub last_reward_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Fresh zero-balance account, used for auto-provisioning.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            last_reward_at: None,
            created_at: Utc::now(),
        }
    }
}

/// One row of the append-only ledger.
///
/// Immutable once committed. A chargeback is always a new record with a
/// negative amount and a back-reference, never an update of the credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub provider: String,
    /// Ledger key component; for `credit-id` chargebacks this is the
    /// derived key, and `reverses` holds the provider-sent id.
    pub external_id: String,
    pub user_id: String,
    /// Signed amount: positive for credits, negative for chargebacks.
    pub amount: Decimal,
    pub kind: TxnKind,
    /// External id of the credit a chargeback reverses, when known.
    pub reverses: Option<String>,
    /// Verbatim received fields, kept for audit.
    pub raw_payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn key(&self) -> TxnKey {
        TxnKey::new(self.provider.clone(), self.external_id.clone())
    }
}

/// Result of one reconciliation. Terminal: the transport renders it into
/// the provider's acknowledgement format and nothing is retried.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The event was committed: one new ledger record, one balance delta.
    Applied {
        kind: TxnKind,
        user_id: String,
        external_id: String,
        /// Signed delta applied to the balance.
        amount: Decimal,
        /// Balance after the commit, as observed by the commit itself.
        new_balance: Decimal,
    },
    /// Pending or unrecognized status token; acknowledged as success so
    /// the provider does not retry.
    Ignored { status_token: String },
    /// The transaction record already existed. Not an error.
    DuplicateIgnored { external_id: String },
    /// Deterministic rejection of the input. Never retried.
    Rejected(crate::error::RejectReason),
}
