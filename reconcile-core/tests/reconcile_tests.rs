//! End-to-end reconciliation tests against the in-memory store.
//!
//! Covers the engine's contract: idempotent replay, isolation under
//! concurrency, verification gating, chargeback accounting, per-provider
//! policies, and bounded conflict retries.

use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use reconcile_core::verify::digest_hex;
use reconcile_core::{
    Account, AckStyle, ChargebackKeying, CommitReceipt, DigestAlgorithm, DigestRecipe, EngineError,
    FieldMap, LedgerMutations, LedgerStore, LedgerTxn, MemoryLedgerStore, MissingUserPolicy,
    Outcome, ProviderRegistry, ProviderSpec, RawFields, Reconciler, RejectReason, StatusTokens,
    StoreError, TransactionRecord, TxnKey, TxnKind, Verification,
};

const SECRET: &str = "s3cret";

fn offerpeak_spec() -> ProviderSpec {
    ProviderSpec {
        id: "offerpeak".into(),
        fields: FieldMap {
            user_id: vec!["user_id".into(), "uid".into(), "sub_id".into()],
            transaction_id: vec!["transaction_id".into(), "tx_id".into()],
            amount: vec!["reward".into(), "amount".into()],
            status: vec!["status".into()],
            default_status: None,
        },
        verification: Verification {
            allowed_origins: vec![],
            digest: Some(DigestRecipe {
                algorithm: DigestAlgorithm::Sha256,
                fields: vec!["user_id".into(), "reward".into(), "transaction_id".into()],
                signature_keys: vec!["hash".into()],
            }),
        },
        secret: Some(SECRET.into()),
        statuses: StatusTokens {
            credit: vec!["completed".into(), "approved".into()],
            chargeback: vec!["chargeback".into()],
            ignore: vec!["pending".into()],
        },
        missing_user: MissingUserPolicy::Reject,
        chargeback_keying: ChargebackKeying::CreditId,
        ack: AckStyle::Json,
        user_not_found_status: 404,
    }
}

fn surveymint_spec() -> ProviderSpec {
    ProviderSpec {
        id: "surveymint".into(),
        fields: FieldMap {
            user_id: vec!["uid".into()],
            transaction_id: vec!["tx_id".into()],
            amount: vec!["payout".into()],
            status: vec!["status".into()],
            default_status: Some("1".into()),
        },
        verification: Verification {
            allowed_origins: vec!["203.0.113.7".into()],
            digest: None,
        },
        secret: None,
        statuses: StatusTokens {
            credit: vec!["1".into()],
            chargeback: vec!["2".into()],
            ignore: vec![],
        },
        missing_user: MissingUserPolicy::AutoCreate,
        chargeback_keying: ChargebackKeying::DistinctId,
        ack: AckStyle::Digit,
        user_not_found_status: 404,
    }
}

fn registry() -> ProviderRegistry {
    ProviderRegistry::from_specs([offerpeak_spec(), surveymint_spec()]).unwrap()
}

fn reconciler(store: Arc<dyn LedgerStore>) -> Reconciler {
    Reconciler::new(registry(), store)
}

fn raw(pairs: &[(&str, &str)]) -> RawFields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A valid offerpeak credit postback for `user`/`txn`/`amount`.
fn signed_credit(user: &str, txn: &str, amount: &str, status: &str) -> RawFields {
    let mut fields = raw(&[
        ("user_id", user),
        ("reward", amount),
        ("transaction_id", txn),
        ("status", status),
    ]);
    let digest = digest_hex(
        DigestAlgorithm::Sha256,
        format!("{user}{amount}{txn}{SECRET}").as_bytes(),
    );
    fields.insert("hash".into(), digest);
    fields
}

#[tokio::test]
async fn credit_applies_once_with_exact_amounts() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.put_account(Account::new("u1"));
    let engine = reconciler(store.clone());

    let outcome = engine
        .reconcile("offerpeak", &signed_credit("u1", "t1001", "10.50", "approved"), &[])
        .await
        .unwrap();

    match outcome {
        Outcome::Applied {
            kind,
            amount,
            new_balance,
            ref external_id,
            ..
        } => {
            assert_eq!(kind, TxnKind::Credit);
            assert_eq!(amount, dec!(10.50));
            assert_eq!(new_balance, dec!(10.50));
            assert_eq!(external_id, "t1001");
        }
        other => panic!("expected Applied, got {:?}", other),
    }

    let account = store.account("u1").unwrap();
    assert_eq!(account.balance, dec!(10.50));
    assert_eq!(account.total_earnings, dec!(10.50));
    assert!(account.last_reward_at.is_some());
    assert_eq!(store.record_count(), 1);
}

#[tokio::test]
async fn replayed_credit_is_duplicate_ignored() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.put_account(Account::new("u1"));
    let engine = reconciler(store.clone());
    let fields = signed_credit("u1", "t1001", "10.50", "completed");

    let first = engine.reconcile("offerpeak", &fields, &[]).await.unwrap();
    assert!(matches!(first, Outcome::Applied { .. }));

    for _ in 0..3 {
        let replay = engine.reconcile("offerpeak", &fields, &[]).await.unwrap();
        assert_eq!(
            replay,
            Outcome::DuplicateIgnored {
                external_id: "t1001".into()
            }
        );
    }

    assert_eq!(store.account("u1").unwrap().balance, dec!(10.50));
    assert_eq!(store.record_count(), 1);
}

#[tokio::test]
async fn concurrent_identical_credits_apply_exactly_once() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.put_account(Account::new("u1"));
    let engine = Arc::new(reconciler(store.clone()));
    let fields = signed_credit("u1", "t-race", "4.25", "approved");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        let fields = fields.clone();
        handles.push(tokio::spawn(async move {
            engine.reconcile("offerpeak", &fields, &[]).await.unwrap()
        }));
    }

    let mut applied = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Outcome::Applied { .. } => applied += 1,
            Outcome::DuplicateIgnored { .. } => duplicates += 1,
            other => panic!("unexpected outcome under contention: {:?}", other),
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(store.account("u1").unwrap().balance, dec!(4.25));
    assert_eq!(store.record_count(), 1);
}

#[tokio::test]
async fn bad_digest_is_forbidden_and_store_untouched() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.put_account(Account::new("u1"));
    let engine = reconciler(store.clone());

    let mut fields = signed_credit("u1", "t1", "5", "approved");
    fields.insert("hash".into(), "0".repeat(64));

    let outcome = engine.reconcile("offerpeak", &fields, &[]).await.unwrap();
    assert!(matches!(
        outcome,
        Outcome::Rejected(RejectReason::Forbidden(_))
    ));
    assert_eq!(store.account("u1").unwrap().balance, dec!(0));
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn unlisted_origin_attempts_no_store_access() {
    let inner = MemoryLedgerStore::new();
    inner.put_account(Account::new("u9"));
    let store = Arc::new(CountingStore::new(inner));
    let engine = reconciler(store.clone());

    let fields = raw(&[("uid", "u9"), ("tx_id", "t1"), ("payout", "3"), ("status", "1")]);
    let outcome = engine
        .reconcile("surveymint", &fields, &["198.51.100.9".into()])
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        Outcome::Rejected(RejectReason::Forbidden(_))
    ));
    assert_eq!(store.begins(), 0);
}

#[tokio::test]
async fn forwarded_chain_member_passes_allow_list() {
    let store = Arc::new(MemoryLedgerStore::new());
    let engine = reconciler(store.clone());

    let fields = raw(&[("uid", "u9"), ("tx_id", "t1"), ("payout", "3"), ("status", "1")]);
    let origins = vec!["10.0.0.1".to_string(), "203.0.113.7".to_string()];
    let outcome = engine.reconcile("surveymint", &fields, &origins).await.unwrap();

    assert!(matches!(outcome, Outcome::Applied { .. }));
}

#[tokio::test]
async fn pending_status_is_ignored_without_mutation() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.put_account(Account::new("u1"));
    let engine = reconciler(store.clone());

    let outcome = engine
        .reconcile("offerpeak", &signed_credit("u1", "t1", "5", "pending"), &[])
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Ignored {
            status_token: "pending".into()
        }
    );
    assert_eq!(store.record_count(), 0);

    // The approved token later arrives as a fresh, first-seen event.
    let outcome = engine
        .reconcile("offerpeak", &signed_credit("u1", "t1", "5", "approved"), &[])
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Applied { .. }));
}

#[tokio::test]
async fn missing_field_names_the_first_absent_one() {
    let store = Arc::new(MemoryLedgerStore::new());
    let engine = reconciler(store);

    let fields = raw(&[("reward", "5"), ("status", "approved")]);
    let outcome = engine.reconcile("offerpeak", &fields, &[]).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Rejected(RejectReason::MissingField("user_id".into()))
    );
}

#[tokio::test]
async fn non_numeric_and_non_positive_amounts_are_rejected() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.put_account(Account::new("u1"));
    let engine = reconciler(store.clone());

    for bad in ["abc", "0", "-3"] {
        let outcome = engine
            .reconcile("offerpeak", &signed_credit("u1", "t1", bad, "approved"), &[])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Rejected(RejectReason::InvalidAmount(bad.into())),
            "amount {:?}",
            bad
        );
    }
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn unknown_user_rejected_under_reject_policy() {
    let store = Arc::new(MemoryLedgerStore::new());
    let engine = reconciler(store.clone());

    let outcome = engine
        .reconcile("offerpeak", &signed_credit("ghost", "t1", "5", "approved"), &[])
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Rejected(RejectReason::UserNotFound("ghost".into()))
    );
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn unknown_user_auto_created_under_auto_create_policy() {
    let store = Arc::new(MemoryLedgerStore::new());
    let engine = reconciler(store.clone());

    let fields = raw(&[("uid", "fresh"), ("tx_id", "t1"), ("payout", "2.75"), ("status", "1")]);
    let outcome = engine
        .reconcile("surveymint", &fields, &["203.0.113.7".into()])
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Applied { .. }));
    let account = store.account("fresh").unwrap();
    assert_eq!(account.balance, dec!(2.75));
    assert_eq!(account.total_earnings, dec!(2.75));
}

#[tokio::test]
async fn chargeback_debits_balance_but_not_earnings() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.put_account(Account::new("u1"));
    let engine = reconciler(store.clone());

    let credit = engine
        .reconcile("offerpeak", &signed_credit("u1", "t1", "20", "approved"), &[])
        .await
        .unwrap();
    assert!(matches!(credit, Outcome::Applied { .. }));

    let outcome = engine
        .reconcile("offerpeak", &signed_credit("u1", "t1", "5", "chargeback"), &[])
        .await
        .unwrap();

    match outcome {
        Outcome::Applied {
            kind,
            amount,
            new_balance,
            ref external_id,
            ..
        } => {
            assert_eq!(kind, TxnKind::Chargeback);
            assert_eq!(amount, dec!(-5));
            assert_eq!(new_balance, dec!(15));
            // credit-id keying: derived key, credit row untouched.
            assert_eq!(external_id, "t1:cb");
        }
        other => panic!("expected Applied, got {:?}", other),
    }

    let account = store.account("u1").unwrap();
    assert_eq!(account.balance, dec!(15));
    assert_eq!(account.total_earnings, dec!(20));

    let chargeback = store
        .record(&TxnKey::new("offerpeak", "t1:cb"))
        .unwrap();
    assert_eq!(chargeback.reverses.as_deref(), Some("t1"));
    let credit = store.record(&TxnKey::new("offerpeak", "t1")).unwrap();
    assert_eq!(credit.amount, dec!(20));

    // Replayed chargebacks must not double-debit.
    let replay = engine
        .reconcile("offerpeak", &signed_credit("u1", "t1", "5", "chargeback"), &[])
        .await
        .unwrap();
    assert!(matches!(replay, Outcome::DuplicateIgnored { .. }));
    assert_eq!(store.account("u1").unwrap().balance, dec!(15));
}

#[tokio::test]
async fn unknown_provider_is_rejected() {
    let store = Arc::new(MemoryLedgerStore::new());
    let engine = reconciler(store);

    let outcome = engine
        .reconcile("nobody", &raw(&[("user_id", "u1")]), &[])
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Rejected(RejectReason::UnknownProvider("nobody".into()))
    );
}

#[tokio::test]
async fn raw_payload_is_kept_verbatim_for_audit() {
    let store = Arc::new(MemoryLedgerStore::new());
    store.put_account(Account::new("u1"));
    let engine = reconciler(store.clone());

    let fields = signed_credit("u1", "t1", "5", "approved");
    engine.reconcile("offerpeak", &fields, &[]).await.unwrap();

    let record = store.record(&TxnKey::new("offerpeak", "t1")).unwrap();
    assert_eq!(record.raw_payload["user_id"], "u1");
    assert_eq!(record.raw_payload["reward"], "5");
    assert_eq!(record.raw_payload["status"], "approved");
}

#[tokio::test]
async fn transient_conflicts_are_retried_then_succeed() {
    let inner = MemoryLedgerStore::new();
    inner.put_account(Account::new("u1"));
    let store = Arc::new(FlakyStore::new(inner.clone(), 2));
    let engine = reconciler(store);

    let outcome = engine
        .reconcile("offerpeak", &signed_credit("u1", "t1", "5", "approved"), &[])
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Applied { .. }));
    assert_eq!(inner.account("u1").unwrap().balance, dec!(5));
}

#[tokio::test]
async fn exhausted_conflict_budget_surfaces_engine_error() {
    let inner = MemoryLedgerStore::new();
    inner.put_account(Account::new("u1"));
    let store = Arc::new(FlakyStore::new(inner.clone(), 10));
    let engine = reconciler(store);

    let err = engine
        .reconcile("offerpeak", &signed_credit("u1", "t1", "5", "approved"), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Conflict { attempts: 3 }));
    // Nothing committed.
    assert_eq!(inner.account("u1").unwrap().balance, dec!(0));
    assert_eq!(inner.record_count(), 0);
}

#[tokio::test]
async fn aborted_commit_leaves_no_partial_state() {
    let inner = MemoryLedgerStore::new();
    inner.put_account(Account::new("u1"));
    let store = Arc::new(AbortingStore::new(inner.clone()));
    let engine = reconciler(store);

    let err = engine
        .reconcile("offerpeak", &signed_credit("u1", "t1", "5", "approved"), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Store(StoreError::Unavailable(_))));
    assert_eq!(inner.account("u1").unwrap().balance, dec!(0));
    assert_eq!(inner.record_count(), 0);
}

// ---- Test store wrappers ------------------------------------------------

/// Counts `begin` calls; used to prove verification failures never reach
/// the store.
struct CountingStore {
    inner: MemoryLedgerStore,
    begins: AtomicU32,
}

impl CountingStore {
    fn new(inner: MemoryLedgerStore) -> Self {
        Self {
            inner,
            begins: AtomicU32::new(0),
        }
    }

    fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for CountingStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.begin().await
    }
}

/// Fails the first `failures` commits with a conflict, then delegates.
struct FlakyStore {
    inner: MemoryLedgerStore,
    failures: Arc<AtomicU32>,
}

impl FlakyStore {
    fn new(inner: MemoryLedgerStore, failures: u32) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicU32::new(failures)),
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, StoreError> {
        Ok(Box::new(FlakyTxn {
            inner: self.inner.begin().await?,
            failures: Arc::clone(&self.failures),
        }))
    }
}

struct FlakyTxn {
    inner: Box<dyn LedgerTxn>,
    failures: Arc<AtomicU32>,
}

#[async_trait]
impl LedgerTxn for FlakyTxn {
    async fn read_account(&mut self, user_id: &str) -> Result<Option<Account>, StoreError> {
        self.inner.read_account(user_id).await
    }

    async fn read_transaction(
        &mut self,
        key: &TxnKey,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        self.inner.read_transaction(key).await
    }

    async fn commit(
        self: Box<Self>,
        mutations: LedgerMutations,
    ) -> Result<CommitReceipt, StoreError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict("injected".into()));
        }
        self.inner.commit(mutations).await
    }
}

/// Every commit aborts; reads pass through.
struct AbortingStore {
    inner: MemoryLedgerStore,
}

impl AbortingStore {
    fn new(inner: MemoryLedgerStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LedgerStore for AbortingStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, StoreError> {
        Ok(Box::new(AbortingTxn {
            inner: self.inner.begin().await?,
        }))
    }
}

struct AbortingTxn {
    inner: Box<dyn LedgerTxn>,
}

#[async_trait]
impl LedgerTxn for AbortingTxn {
    async fn read_account(&mut self, user_id: &str) -> Result<Option<Account>, StoreError> {
        self.inner.read_account(user_id).await
    }

    async fn read_transaction(
        &mut self,
        key: &TxnKey,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        self.inner.read_transaction(key).await
    }

    async fn commit(
        self: Box<Self>,
        _mutations: LedgerMutations,
    ) -> Result<CommitReceipt, StoreError> {
        Err(StoreError::Unavailable("injected abort".into()))
    }
}
