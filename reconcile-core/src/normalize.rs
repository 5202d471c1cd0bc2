//! Field normalization.
//!
//! Providers name the same concepts differently (`user_id`, `uid`,
//! `sub_id`, ...). Each provider declares an ordered synonym list per
//! canonical field; the first present, non-empty synonym wins. There is
//! no inference beyond literal key lookup.

use crate::error::RejectReason;
use crate::registry::FieldMap;
use crate::types::{CanonicalEvent, RawFields};

/// Canonical field names, used verbatim in `MissingField` rejections.
pub const FIELD_USER_ID: &str = "user_id";
pub const FIELD_TRANSACTION_ID: &str = "transaction_id";
pub const FIELD_AMOUNT: &str = "amount";
pub const FIELD_STATUS: &str = "status";

/// First present, non-empty value among `keys`, in declared order.
fn first_present<'a>(raw: &'a RawFields, keys: &[String]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| raw.get(key))
        .map(String::as_str)
        .find(|value| !value.is_empty())
}

/// Map a raw field mapping onto the canonical event shape.
///
/// Fails with the first absent canonical field, checked in the order
/// user id, transaction id, amount, status.
pub fn normalize(
    provider: &str,
    fields: &FieldMap,
    raw: &RawFields,
) -> Result<CanonicalEvent, RejectReason> {
    let user_id = first_present(raw, &fields.user_id)
        .ok_or_else(|| RejectReason::MissingField(FIELD_USER_ID.into()))?;
    let external_txn_id = first_present(raw, &fields.transaction_id)
        .ok_or_else(|| RejectReason::MissingField(FIELD_TRANSACTION_ID.into()))?;
    let raw_amount = first_present(raw, &fields.amount)
        .ok_or_else(|| RejectReason::MissingField(FIELD_AMOUNT.into()))?;

    let status_token = match first_present(raw, &fields.status) {
        Some(token) => token.to_string(),
        None => match &fields.default_status {
            Some(default) => default.clone(),
            None if fields.status.is_empty() => {
                // Provider declared no status concept at all: every event
                // it sends is a confirmed one.
                "approved".to_string()
            }
            None => return Err(RejectReason::MissingField(FIELD_STATUS.into())),
        },
    };

    Ok(CanonicalEvent {
        provider: provider.to_string(),
        user_id: user_id.to_string(),
        external_txn_id: external_txn_id.to_string(),
        raw_amount: raw_amount.to_string(),
        status_token,
    })
}
