//! Acknowledgement rendering.
//!
//! Each provider's protocol fixes the body it expects back: a bare `OK`,
//! a bare `1`/`0`, or a structured JSON body. Status codes follow the
//! shared convention: 200 for applied/ignored/duplicate, 400 for
//! malformed input, 403 for failed verification, 404 or 500 for unknown
//! users per provider, 500 for transient failures so the provider
//! retries.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

use reconcile_core::{AckStyle, Outcome, ProviderSpec, RejectReason};

/// Render a terminal outcome into the provider's acknowledgement.
pub fn render(spec: Option<&ProviderSpec>, outcome: &Outcome) -> HttpResponse {
    let style = spec.map(|s| s.ack).unwrap_or_default();

    match outcome {
        Outcome::Applied {
            user_id,
            external_id,
            amount,
            new_balance,
            ..
        } => success(
            style,
            json!({
                "success": true,
                "message": "Reward credited successfully",
                "user_id": user_id,
                "transaction_id": external_id,
                "amount": amount,
                "new_balance": new_balance,
            }),
        ),
        Outcome::Ignored { .. } => success(
            style,
            json!({
                "success": true,
                "message": "Postback received but status not approved yet",
            }),
        ),
        Outcome::DuplicateIgnored { external_id } => success(
            style,
            json!({
                "success": true,
                "message": "Transaction already processed",
                "transaction_id": external_id,
            }),
        ),
        Outcome::Rejected(reason) => {
            let status = rejection_status(spec, reason);
            failure(style, status, &reason.to_string())
        }
    }
}

/// Store-side failure: always 500 so the provider's retry convention
/// kicks in.
pub fn render_failure(spec: Option<&ProviderSpec>) -> HttpResponse {
    let style = spec.map(|s| s.ack).unwrap_or_default();
    failure(style, StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn rejection_status(spec: Option<&ProviderSpec>, reason: &RejectReason) -> StatusCode {
    match reason {
        RejectReason::MissingField(_)
        | RejectReason::InvalidAmount(_)
        | RejectReason::UnknownProvider(_) => StatusCode::BAD_REQUEST,
        RejectReason::Forbidden(_) => StatusCode::FORBIDDEN,
        RejectReason::UserNotFound(_) => spec
            .and_then(|s| StatusCode::from_u16(s.user_not_found_status).ok())
            .unwrap_or(StatusCode::NOT_FOUND),
    }
}

fn success(style: AckStyle, body: serde_json::Value) -> HttpResponse {
    match style {
        AckStyle::OkText => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body("OK"),
        AckStyle::Digit => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body("1"),
        AckStyle::Json => HttpResponse::Ok().json(body),
    }
}

fn failure(style: AckStyle, status: StatusCode, message: &str) -> HttpResponse {
    match style {
        AckStyle::OkText => HttpResponse::build(status)
            .content_type("text/plain; charset=utf-8")
            .body("ERROR"),
        AckStyle::Digit => HttpResponse::build(status)
            .content_type("text/plain; charset=utf-8")
            .body("0"),
        AckStyle::Json => HttpResponse::build(status).json(json!({ "error": message })),
    }
}
