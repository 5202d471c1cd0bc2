//! In-memory ledger store.
//!
//! Implements the same atomicity contract as the Postgres store with
//! optimistic commit validation: reads take no lock and record what they
//! observed; the commit re-checks the dedup key under one lock and
//! reports `Conflict` when another commit won the race. Used by the test
//! suites and as the gateway's volatile dev backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StoreError;
use crate::store::{CommitReceipt, LedgerMutations, LedgerStore, LedgerTxn};
use crate::types::{Account, TransactionRecord, TxnKey};

#[derive(Default)]
struct Shared {
    accounts: HashMap<String, Account>,
    records: HashMap<TxnKey, TransactionRecord>,
}

/// Volatile ledger store backed by two maps behind one lock.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account out-of-band, the way the surrounding application
    /// would have created it.
    pub fn put_account(&self, account: Account) {
        let mut shared = self.shared.lock();
        shared.accounts.insert(account.user_id.clone(), account);
    }

    pub fn account(&self, user_id: &str) -> Option<Account> {
        self.shared.lock().accounts.get(user_id).cloned()
    }

    pub fn record(&self, key: &TxnKey) -> Option<TransactionRecord> {
        self.shared.lock().records.get(key).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.shared.lock().records.len()
    }
}

impl std::fmt::Debug for MemoryLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("MemoryLedgerStore")
            .field("accounts", &shared.accounts.len())
            .field("records", &shared.records.len())
            .finish()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, StoreError> {
        Ok(Box::new(MemoryTxn {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemoryTxn {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl LedgerTxn for MemoryTxn {
    async fn read_account(&mut self, user_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.shared.lock().accounts.get(user_id).cloned())
    }

    async fn read_transaction(
        &mut self,
        key: &TxnKey,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.shared.lock().records.get(key).cloned())
    }

    async fn commit(
        self: Box<Self>,
        mutations: LedgerMutations,
    ) -> Result<CommitReceipt, StoreError> {
        let mut shared = self.shared.lock();
        let key = mutations.record.key();

        // Optimistic validation: the caller only commits after reading
        // the key as absent, so presence here means a lost race.
        if shared.records.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "transaction record already present: {}",
                key
            )));
        }

        if mutations.create_account {
            shared
                .accounts
                .entry(mutations.record.user_id.clone())
                .or_insert_with(|| Account::new(mutations.record.user_id.clone()));
        }

        let account = shared
            .accounts
            .get_mut(&mutations.record.user_id)
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "account missing at commit: {}",
                    mutations.record.user_id
                ))
            })?;

        account.balance += mutations.balance_delta;
        account.total_earnings += mutations.earnings_delta;
        account.last_reward_at = Some(mutations.record.received_at);
        let new_balance = account.balance;

        shared.records.insert(key, mutations.record);

        Ok(CommitReceipt { new_balance })
    }
}
