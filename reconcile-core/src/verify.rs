//! Postback authenticity checks.
//!
//! Two strategies, both declared per provider in the registry: a
//! network-origin allow-list and a keyed-digest check over a declared
//! field recipe. The engine executes the declared recipe only; it has no
//! opinion about which fields or algorithm a provider should use.

use sha2::{Digest as _, Sha256, Sha512};

use crate::error::RejectReason;
use crate::registry::{DigestAlgorithm, DigestRecipe, Verification};
use crate::types::RawFields;

/// Run every configured check for this provider. Order matters only in
/// that both run before any store access.
pub fn verify(
    verification: &Verification,
    secret: Option<&str>,
    raw: &RawFields,
    origins: &[String],
) -> Result<(), RejectReason> {
    check_origins(&verification.allowed_origins, origins)?;
    if let (Some(recipe), Some(secret)) = (&verification.digest, secret) {
        check_digest(recipe, secret, raw)?;
    }
    Ok(())
}

/// Any one claimed source address matching any allow-listed address is
/// sufficient. An empty allow-list disables the check.
fn check_origins(allowed: &[String], origins: &[String]) -> Result<(), RejectReason> {
    if allowed.is_empty() {
        return Ok(());
    }
    let hit = origins
        .iter()
        .any(|origin| allowed.iter().any(|a| a == origin.trim()));
    if hit {
        Ok(())
    } else {
        Err(RejectReason::Forbidden(format!(
            "origin not allow-listed: {:?}",
            origins
        )))
    }
}

fn check_digest(recipe: &DigestRecipe, secret: &str, raw: &RawFields) -> Result<(), RejectReason> {
    let supplied = recipe
        .signature_keys
        .iter()
        .filter_map(|key| raw.get(key))
        .map(String::as_str)
        .find(|value| !value.is_empty())
        .ok_or_else(|| RejectReason::Forbidden("signature field missing".into()))?;

    let mut input = String::new();
    for field in &recipe.fields {
        // A missing recipe field contributes nothing; the comparison
        // then fails unless the provider computed it the same way.
        if let Some(value) = raw.get(field) {
            input.push_str(value);
        }
    }
    input.push_str(secret);

    let expected = digest_hex(recipe.algorithm, input.as_bytes());
    if eq_hex(&expected, supplied) {
        Ok(())
    } else {
        Err(RejectReason::Forbidden("digest mismatch".into()))
    }
}

/// Lowercase hex digest of `input` under `algorithm`.
pub fn digest_hex(algorithm: DigestAlgorithm, input: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(input)),
        DigestAlgorithm::Sha512 => hex::encode(Sha512::digest(input)),
        DigestAlgorithm::Blake3 => blake3::hash(input).to_hex().to_string(),
    }
}

/// Fixed-length comparison, case-insensitive over hex digits.
fn eq_hex(expected: &str, supplied: &str) -> bool {
    expected.len() == supplied.len() && expected.eq_ignore_ascii_case(supplied)
}
