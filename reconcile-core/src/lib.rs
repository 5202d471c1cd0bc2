//! RewardRail reconciliation core.
//!
//! Converts untrusted reward postbacks from heterogeneous third-party
//! providers into exactly-once credits (or chargeback debits) against
//! persistent per-user balances.
//!
//! # Architecture
//!
//! - **Provider registry**: every provider-specific fact (field
//!   synonyms, verification recipe, status tokens, policies) is
//!   declarative data, not code
//! - **One orchestrator**: normalize → verify → classify → commit, with
//!   no per-provider branches
//! - **Transactional store seam**: all side effects inside a single
//!   store transaction; Postgres in production, in-memory for tests
//!
//! # Invariants
//!
//! - At most one credit ever commits per `(provider, external_id)`
//! - The transaction ledger is append-only; chargebacks are new rows
//! - `total_earnings` is monotonically non-decreasing
//! - No partial state is observable between validation and commit

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod engine;
pub mod error;
pub mod normalize;
pub mod registry;
pub mod store;
pub mod types;
pub mod verify;

// Re-exports
pub use engine::Reconciler;
pub use error::{EngineError, RejectReason, StoreError};
pub use registry::{
    AckStyle, ChargebackKeying, DigestAlgorithm, DigestRecipe, FieldMap, MissingUserPolicy,
    ProviderRegistry, ProviderSpec, StatusTokens, Verification,
};
pub use store::{
    CommitReceipt, LedgerMutations, LedgerStore, LedgerTxn, MemoryLedgerStore, PgLedgerStore,
};
pub use types::{
    Account, CanonicalEvent, Classification, Outcome, RawFields, TransactionRecord, TxnKey,
    TxnKind,
};
