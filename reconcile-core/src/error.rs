//! Error taxonomy for the reconciliation engine.

use thiserror::Error;

/// Deterministic rejection of an inbound postback.
///
/// These are judgements about the input, not failures of the system:
/// they are surfaced immediately and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// A canonical field had no present synonym in the raw mapping.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// The amount field was non-numeric or out of range for its kind.
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),

    /// Origin or digest verification failed.
    #[error("verification failed: {0}")]
    Forbidden(String),

    /// No account exists and the provider policy is to reject.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The provider id has no registry entry.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Failures surfaced by the ledger store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Read-write conflict detected at commit; safe to retry the whole
    /// read-decide-commit cycle.
    #[error("transient store conflict: {0}")]
    Conflict(String),

    /// The store could not be reached or the transaction failed
    /// permanently. No partial effect is visible.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted row failed to decode.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                // 23505: unique violation on the dedup key (lost the race
                // to another reconciliation). 40001/40P01: serialization
                // failure / deadlock. All retryable.
                match db.code().as_deref() {
                    Some("23505") | Some("40001") | Some("40P01") => {
                        StoreError::Conflict(db.to_string())
                    }
                    _ => StoreError::Unavailable(err.to_string()),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Failure of a reconciliation call after the deterministic phases passed.
///
/// The transport maps these to the provider's retry convention (HTTP 500).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The store kept reporting conflicts past the retry budget.
    #[error("store conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
