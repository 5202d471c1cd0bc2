//! Declarative provider descriptors.
//!
//! Every provider-specific fact lives here as data: field synonyms,
//! verification recipe, status-token sets, policies, and acknowledgement
//! requirements. The orchestrator consumes the registry and contains no
//! per-provider branches; integrating a new provider is one more entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::types::Classification;

/// Digest algorithm for the keyed-digest check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
    Blake3,
}

/// Keyed-digest recipe: concatenate the named raw fields in order, append
/// the shared secret, hash, and compare lowercase hex against the value
/// the provider supplied under one of `signature_keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestRecipe {
    pub algorithm: DigestAlgorithm,
    /// Raw field keys whose values form the digest input, in declared
    /// order. A missing field contributes the empty string.
    pub fields: Vec<String>,
    /// Keys under which the provider supplies its digest, in priority
    /// order.
    #[serde(default = "default_signature_keys")]
    pub signature_keys: Vec<String>,
}

fn default_signature_keys() -> Vec<String> {
    vec!["hash".to_string(), "signature".to_string()]
}

/// Verification requirements for one provider. Both checks are optional;
/// an empty allow-list disables the origin check, and a missing shared
/// secret disables the digest check (a policy decision, not a guarantee).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Verification {
    /// Source addresses the provider is allowed to call from.
    pub allowed_origins: Vec<String>,
    pub digest: Option<DigestRecipe>,
}

/// Ordered source-key synonyms for each canonical field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMap {
    pub user_id: Vec<String>,
    pub transaction_id: Vec<String>,
    pub amount: Vec<String>,
    /// Empty when the provider has no status concept; `default_status`
    /// then stands in for every event.
    #[serde(default)]
    pub status: Vec<String>,
    /// Token assumed when the status field is declared but absent, or not
    /// declared at all.
    #[serde(default)]
    pub default_status: Option<String>,
}

/// What to do when a postback names a user with no account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingUserPolicy {
    /// Reject the event; the provider will not be asked to retry.
    #[default]
    Reject,
    /// Create a zero-balance account inside the same commit.
    AutoCreate,
}

/// How a provider identifies chargebacks relative to the original credit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChargebackKeying {
    /// The provider sends its own unique id for the chargeback event.
    #[default]
    DistinctId,
    /// The provider reuses the credit's id; the ledger key is derived by
    /// suffixing so the credit row is never touched.
    CreditId,
}

/// Acknowledgement body format the provider's protocol demands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckStyle {
    /// Bare `OK` / `ERROR` text.
    OkText,
    /// Bare `1` on success, `0` on failure.
    Digit,
    /// Structured `{success, message, ...}` body.
    #[default]
    Json,
}

/// Status tokens grouped by the action they trigger. Tokens missing from
/// all three sets are treated as `ignore`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusTokens {
    pub credit: Vec<String>,
    pub chargeback: Vec<String>,
    pub ignore: Vec<String>,
}

/// Complete declarative description of one provider integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    pub fields: FieldMap,
    #[serde(default)]
    pub verification: Verification,
    /// Shared secret for the digest check, injected from configuration.
    /// Never serialized back out.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    #[serde(default)]
    pub statuses: StatusTokens,
    #[serde(default)]
    pub missing_user: MissingUserPolicy,
    #[serde(default)]
    pub chargeback_keying: ChargebackKeying,
    #[serde(default)]
    pub ack: AckStyle,
    /// HTTP status the provider expects for an unknown user: 404 or 500.
    #[serde(default = "default_user_not_found_status")]
    pub user_not_found_status: u16,
}

fn default_user_not_found_status() -> u16 {
    404
}

impl ProviderSpec {
    /// Classify a status token. Unknown and pending tokens fall through
    /// to `Ignore`: the provider is acknowledged and nothing is written,
    /// so a later approved token arrives as a fresh first-seen event.
    pub fn classify(&self, token: &str) -> Classification {
        let matches = |set: &[String]| set.iter().any(|t| t.eq_ignore_ascii_case(token));
        if matches(&self.statuses.credit) {
            Classification::Credit
        } else if matches(&self.statuses.chargeback) {
            Classification::Chargeback
        } else {
            Classification::Ignore
        }
    }
}

/// Two registry entries claimed the same provider id.
#[derive(Debug, Error)]
#[error("duplicate provider id: {0}")]
pub struct DuplicateProviderError(pub String);

/// Immutable lookup table of provider specs, built once at startup.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderSpec>,
}

impl ProviderRegistry {
    pub fn from_specs(
        specs: impl IntoIterator<Item = ProviderSpec>,
    ) -> Result<Self, DuplicateProviderError> {
        let mut providers = HashMap::new();
        for spec in specs {
            let id = spec.id.clone();
            if providers.insert(id.clone(), spec).is_some() {
                return Err(DuplicateProviderError(id));
            }
        }
        Ok(Self { providers })
    }

    pub fn get(&self, provider_id: &str) -> Option<&ProviderSpec> {
        self.providers.get(provider_id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers.values()
    }
}
