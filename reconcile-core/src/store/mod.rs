//! Transactional ledger store.
//!
//! The account/record pair is the only shared mutable state in the
//! system, so correctness rests entirely on this interface's atomicity
//! contract: one transaction per reconciliation, reads then a single
//! commit, indivisible from the perspective of any concurrent
//! reconciliation for the same key. Balance changes are expressed as
//! relative deltas, never absolute writes, so commits for different keys
//! against the same account serialize without lost updates.

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::types::{Account, TransactionRecord, TxnKey};

/// Mutations applied by one reconciliation commit, all-or-nothing.
#[derive(Debug, Clone)]
pub struct LedgerMutations {
    /// Auto-provision a zero-balance account before applying deltas.
    pub create_account: bool,
    /// The new ledger row. Its `(provider, external_id)` key must be
    /// unseen; a concurrent writer winning the race surfaces `Conflict`.
    pub record: TransactionRecord,
    /// Signed delta applied to `balance`.
    pub balance_delta: Decimal,
    /// Delta applied to `total_earnings`; zero for chargebacks.
    pub earnings_delta: Decimal,
}

/// What a successful commit observed.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub new_balance: Decimal,
}

/// Opens one transaction per reconciliation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, StoreError>;
}

/// One in-flight reconciliation transaction: read the account and the
/// record, then commit exactly once. Dropping without committing must
/// leave no visible effect.
#[async_trait]
pub trait LedgerTxn: Send {
    async fn read_account(&mut self, user_id: &str) -> Result<Option<Account>, StoreError>;

    async fn read_transaction(
        &mut self,
        key: &TxnKey,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    /// Apply all mutations atomically. `Conflict` means another commit
    /// won a race this transaction read through; the caller may retry
    /// the whole read-decide-commit cycle.
    async fn commit(self: Box<Self>, mutations: LedgerMutations) -> Result<CommitReceipt, StoreError>;
}
