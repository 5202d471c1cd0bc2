//! Postgres-backed ledger store.
//!
//! One database transaction per reconciliation. The composite primary
//! key on `reward_transactions (provider, external_id)` enforces the
//! dedup invariant at the storage layer; a unique violation there (or a
//! serialization failure) surfaces as `StoreError::Conflict`, and the
//! retrying caller then observes the committed row. Balance updates are
//! relative (`SET balance = balance + $n`), never absolute writes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::str::FromStr;
use std::time::Duration;

use crate::error::StoreError;
use crate::store::{CommitReceipt, LedgerMutations, LedgerStore, LedgerTxn};
use crate::types::{Account, TransactionRecord, TxnKey, TxnKind};

// `kind` is stored as plain text; decode it through `TxnKind::from_str`
// so an unexpected value surfaces as a decode error instead of a panic.
impl FromRow<'_, PgRow> for TransactionRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        let kind = TxnKind::from_str(&kind).map_err(|e| sqlx::Error::ColumnDecode {
            index: "kind".into(),
            source: e.into(),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            provider: row.try_get("provider")?,
            external_id: row.try_get("external_id")?,
            user_id: row.try_get("user_id")?,
            amount: row.try_get("amount")?,
            kind,
            reverses: row.try_get("reverses")?,
            raw_payload: row.try_get("raw_payload")?,
            received_at: row.try_get("received_at")?,
        })
    }
}

/// Ledger store on a Postgres connection pool.
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl std::fmt::Debug for PgLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgLedgerStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTxn { tx }))
    }
}

/// Rolls back on drop unless committed, per sqlx transaction semantics.
struct PgTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTxn for PgTxn {
    async fn read_account(&mut self, user_id: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT user_id, balance, total_earnings, last_reward_at, created_at
            FROM accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn read_transaction(
        &mut self,
        key: &TxnKey,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let record = sqlx::query_as::<_, TransactionRecord>(
            r#"
            SELECT id, provider, external_id, user_id, amount, kind,
                   reverses, raw_payload, received_at
            FROM reward_transactions
            WHERE provider = $1 AND external_id = $2
            "#,
        )
        .bind(&key.provider)
        .bind(&key.external_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(record)
    }

    async fn commit(
        self: Box<Self>,
        mutations: LedgerMutations,
    ) -> Result<CommitReceipt, StoreError> {
        let mut tx = self.tx;
        let record = &mutations.record;

        if mutations.create_account {
            sqlx::query(
                r#"
                INSERT INTO accounts (user_id, balance, total_earnings, created_at)
                VALUES ($1, 0, 0, now())
                ON CONFLICT (user_id) DO NOTHING
                "#,
            )
            .bind(&record.user_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO reward_transactions
                (id, provider, external_id, user_id, amount, kind,
                 reverses, raw_payload, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.provider)
        .bind(&record.external_id)
        .bind(&record.user_id)
        .bind(record.amount)
        .bind(record.kind.as_str())
        .bind(&record.reverses)
        .bind(&record.raw_payload)
        .bind(record.received_at)
        .execute(&mut *tx)
        .await?;

        let new_balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE accounts
            SET balance = balance + $2,
                total_earnings = total_earnings + $3,
                last_reward_at = $4
            WHERE user_id = $1
            RETURNING balance
            "#,
        )
        .bind(&record.user_id)
        .bind(mutations.balance_delta)
        .bind(mutations.earnings_delta)
        .bind(record.received_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CommitReceipt { new_balance })
    }
}
