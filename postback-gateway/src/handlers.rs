use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use reconcile_core::{RawFields, Reconciler};

use crate::ack;
use crate::metrics::METRICS;

pub struct AppState {
    pub reconciler: Arc<Reconciler>,
}

/// Per-provider postback endpoint.
///
/// Providers differ in method and parameter location, so both GET and
/// POST land here: query parameters and (for POST) an urlencoded or JSON
/// body are flattened into one string map, body keys winning on
/// collision. The engine decides everything else.
pub async fn postback(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let provider_id = path.into_inner();
    METRICS.postbacks_received_total.inc();
    let timer = METRICS.postback_duration_seconds.start_timer();

    let raw = collect_fields(&req, &body);
    let origins = collect_origins(&req);

    let result = state.reconciler.reconcile(&provider_id, &raw, &origins).await;
    timer.observe_duration();

    let spec = state.reconciler.registry().get(&provider_id);
    match result {
        Ok(outcome) => {
            METRICS.track_outcome(&outcome);
            ack::render(spec, &outcome)
        }
        Err(err) => {
            error!(provider = %provider_id, %err, "postback processing failed");
            METRICS.postbacks_failed_total.inc();
            ack::render_failure(spec)
        }
    }
}

/// Flatten query string and body into one single-level string map.
fn collect_fields(req: &HttpRequest, body: &web::Bytes) -> RawFields {
    let mut raw = RawFields::new();

    if let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(req.query_string()) {
        raw.extend(pairs);
    }

    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        if let Ok(map) = serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(body)
        {
            for (key, value) in map {
                // Single level, string-valued: scalars are stringified,
                // nested structures are not field material.
                match value {
                    serde_json::Value::String(s) => {
                        raw.insert(key, s);
                    }
                    serde_json::Value::Number(n) => {
                        raw.insert(key, n.to_string());
                    }
                    serde_json::Value::Bool(b) => {
                        raw.insert(key, b.to_string());
                    }
                    _ => {}
                }
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            raw.extend(pairs);
        }
    }

    raw
}

/// Claimed source addresses: forwarded-chain members first, then the
/// peer address. Any one matching the allow-list is sufficient.
fn collect_origins(req: &HttpRequest) -> Vec<String> {
    let mut origins = Vec::new();

    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        origins.extend(
            forwarded
                .split(',')
                .map(|addr| addr.trim().to_string())
                .filter(|addr| !addr.is_empty()),
        );
    }

    if let Some(peer) = req.peer_addr() {
        origins.push(peer.ip().to_string());
    }

    origins
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "postback-gateway",
        "timestamp": chrono::Utc::now(),
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match METRICS.export() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string(),
        })),
    }
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/postback/{provider}", web::get().to(postback))
        .route("/postback/{provider}", web::post().to(postback))
        .route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics_endpoint));
}
