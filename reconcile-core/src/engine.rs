//! Reconciliation orchestrator.
//!
//! One operation: take a provider id, the raw field mapping, and the
//! claimed origin addresses, and drive normalize → verify → classify →
//! commit for that single event. All side effects are confined to one
//! store transaction; steps 1–4 touch nothing.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, RejectReason, StoreError};
use crate::normalize::normalize;
use crate::registry::{ChargebackKeying, MissingUserPolicy, ProviderRegistry, ProviderSpec};
use crate::store::{LedgerMutations, LedgerStore};
use crate::types::{
    CanonicalEvent, Classification, Outcome, RawFields, TransactionRecord, TxnKey, TxnKind,
};
use crate::verify::verify;

/// Default bound on commit retries after transient store conflicts.
const DEFAULT_COMMIT_ATTEMPTS: u32 = 3;

/// The reconciliation engine. Stateless between calls; the store is the
/// only thing it mutates.
pub struct Reconciler {
    registry: ProviderRegistry,
    store: Arc<dyn LedgerStore>,
    max_commit_attempts: u32,
}

impl Reconciler {
    pub fn new(registry: ProviderRegistry, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            registry,
            store,
            max_commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    /// Override the conflict retry budget (mainly for tests).
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Reconcile one inbound notification.
    ///
    /// `Ok(Outcome)` covers every judgement about the event itself,
    /// including rejections; `Err` is reserved for store trouble, which
    /// the transport reports so the provider retries.
    pub async fn reconcile(
        &self,
        provider_id: &str,
        raw: &RawFields,
        origins: &[String],
    ) -> Result<Outcome, EngineError> {
        let Some(spec) = self.registry.get(provider_id) else {
            warn!(provider = provider_id, "postback for unknown provider");
            return Ok(Outcome::Rejected(RejectReason::UnknownProvider(
                provider_id.to_string(),
            )));
        };

        let event = match normalize(provider_id, &spec.fields, raw) {
            Ok(event) => event,
            Err(reason) => {
                warn!(provider = provider_id, %reason, "postback rejected");
                return Ok(Outcome::Rejected(reason));
            }
        };

        if let Err(reason) = verify(&spec.verification, spec.secret.as_deref(), raw, origins) {
            warn!(
                provider = provider_id,
                user = %event.user_id,
                %reason,
                "postback failed verification"
            );
            return Ok(Outcome::Rejected(reason));
        }

        let classification = spec.classify(&event.status_token);
        let (kind, delta) = match classification {
            Classification::Ignore => {
                info!(
                    provider = provider_id,
                    user = %event.user_id,
                    status = %event.status_token,
                    "postback ignored"
                );
                return Ok(Outcome::Ignored {
                    status_token: event.status_token,
                });
            }
            Classification::Credit => match parse_credit_amount(&event.raw_amount) {
                Some(amount) => (TxnKind::Credit, amount),
                None => return Ok(Outcome::Rejected(RejectReason::InvalidAmount(
                    event.raw_amount,
                ))),
            },
            Classification::Chargeback => match parse_chargeback_magnitude(&event.raw_amount) {
                Some(magnitude) => (TxnKind::Chargeback, -magnitude),
                None => return Ok(Outcome::Rejected(RejectReason::InvalidAmount(
                    event.raw_amount,
                ))),
            },
        };

        let (key, reverses) = ledger_key(spec, &event, kind);
        self.commit_with_retry(spec, &event, raw, kind, delta, key, reverses)
            .await
    }

    /// Step 5: the single atomic read-decide-commit cycle, retried a
    /// bounded number of times on transient conflicts. A retry re-reads
    /// everything, so a lost dedup race converges to `DuplicateIgnored`.
    #[allow(clippy::too_many_arguments)]
    async fn commit_with_retry(
        &self,
        spec: &ProviderSpec,
        event: &CanonicalEvent,
        raw: &RawFields,
        kind: TxnKind,
        delta: Decimal,
        key: TxnKey,
        reverses: Option<String>,
    ) -> Result<Outcome, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut txn = self.store.begin().await?;

            let account = txn.read_account(&event.user_id).await?;
            let create_account = match (&account, spec.missing_user) {
                (Some(_), _) => false,
                (None, MissingUserPolicy::AutoCreate) => true,
                (None, MissingUserPolicy::Reject) => {
                    warn!(
                        provider = %event.provider,
                        user = %event.user_id,
                        "postback for unknown user"
                    );
                    return Ok(Outcome::Rejected(RejectReason::UserNotFound(
                        event.user_id.clone(),
                    )));
                }
            };

            if txn.read_transaction(&key).await?.is_some() {
                info!(
                    provider = %event.provider,
                    user = %event.user_id,
                    key = %key,
                    "duplicate postback ignored"
                );
                return Ok(Outcome::DuplicateIgnored {
                    external_id: key.external_id,
                });
            }

            let record = TransactionRecord {
                id: Uuid::new_v4(),
                provider: key.provider.clone(),
                external_id: key.external_id.clone(),
                user_id: event.user_id.clone(),
                amount: delta,
                kind,
                reverses: reverses.clone(),
                raw_payload: serde_json::to_value(raw)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))
                    .map_err(EngineError::Store)?,
                received_at: chrono::Utc::now(),
            };

            let mutations = LedgerMutations {
                create_account,
                record,
                balance_delta: delta,
                earnings_delta: if kind == TxnKind::Credit {
                    delta
                } else {
                    Decimal::ZERO
                },
            };

            match txn.commit(mutations).await {
                Ok(receipt) => {
                    info!(
                        provider = %event.provider,
                        user = %event.user_id,
                        key = %key,
                        kind = kind.as_str(),
                        amount = %delta,
                        new_balance = %receipt.new_balance,
                        "reward reconciled"
                    );
                    return Ok(Outcome::Applied {
                        kind,
                        user_id: event.user_id.clone(),
                        external_id: key.external_id,
                        amount: delta,
                        new_balance: receipt.new_balance,
                    });
                }
                Err(StoreError::Conflict(reason)) if attempt < self.max_commit_attempts => {
                    debug!(key = %key, attempt, %reason, "commit conflict, retrying");
                    continue;
                }
                Err(StoreError::Conflict(reason)) => {
                    warn!(key = %key, attempt, %reason, "commit conflict budget exhausted");
                    return Err(EngineError::Conflict { attempts: attempt });
                }
                Err(err) => return Err(EngineError::Store(err)),
            }
        }
    }
}

/// Credits demand a strictly positive magnitude.
fn parse_credit_amount(raw: &str) -> Option<Decimal> {
    let amount = Decimal::from_str(raw.trim()).ok()?;
    (amount > Decimal::ZERO).then_some(amount)
}

/// Chargebacks reverse a positive magnitude; providers disagree on the
/// sign they transmit, so the absolute value is taken.
fn parse_chargeback_magnitude(raw: &str) -> Option<Decimal> {
    let amount = Decimal::from_str(raw.trim()).ok()?.abs();
    (amount > Decimal::ZERO).then_some(amount)
}

/// Ledger key and back-reference for the event. Credits use the
/// provider-native id as-is; `credit-id` chargebacks derive a suffixed
/// key so the credit row stays untouched and the ledger append-only.
fn ledger_key(
    spec: &ProviderSpec,
    event: &CanonicalEvent,
    kind: TxnKind,
) -> (TxnKey, Option<String>) {
    match (kind, spec.chargeback_keying) {
        (TxnKind::Chargeback, ChargebackKeying::CreditId) => (
            TxnKey::new(
                event.provider.clone(),
                format!("{}:cb", event.external_txn_id),
            ),
            Some(event.external_txn_id.clone()),
        ),
        _ => (
            TxnKey::new(event.provider.clone(), event.external_txn_id.clone()),
            None,
        ),
    }
}
