// Prometheus metrics for the postback gateway.
// Tracks: postback outcomes, processing latency, credited volume.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_with_registry, register_histogram_with_registry, Counter, Encoder, Histogram,
    HistogramOpts, Opts, Registry, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;

use reconcile_core::{Outcome, TxnKind};

pub struct Metrics {
    pub registry: Registry,

    // Postback outcomes
    pub postbacks_received_total: Counter,
    pub postbacks_applied_total: Counter,
    pub postbacks_ignored_total: Counter,
    pub postbacks_duplicate_total: Counter,
    pub postbacks_rejected_total: Counter,
    pub postbacks_failed_total: Counter,

    // Business volume
    pub credited_volume_total: Counter,
    pub chargeback_volume_total: Counter,

    // Latency
    pub postback_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let postbacks_received_total = register_counter_with_registry!(
            Opts::new("rewardrail_postbacks_received_total", "Postbacks received"),
            registry
        )?;

        let postbacks_applied_total = register_counter_with_registry!(
            Opts::new("rewardrail_postbacks_applied_total", "Postbacks committed to the ledger"),
            registry
        )?;

        let postbacks_ignored_total = register_counter_with_registry!(
            Opts::new("rewardrail_postbacks_ignored_total", "Postbacks with pending/unknown status"),
            registry
        )?;

        let postbacks_duplicate_total = register_counter_with_registry!(
            Opts::new("rewardrail_postbacks_duplicate_total", "Duplicate postbacks suppressed"),
            registry
        )?;

        let postbacks_rejected_total = register_counter_with_registry!(
            Opts::new("rewardrail_postbacks_rejected_total", "Postbacks rejected deterministically"),
            registry
        )?;

        let postbacks_failed_total = register_counter_with_registry!(
            Opts::new("rewardrail_postbacks_failed_total", "Postbacks failed on store trouble"),
            registry
        )?;

        let credited_volume_total = register_counter_with_registry!(
            Opts::new("rewardrail_credited_volume_total", "Total credited amount"),
            registry
        )?;

        let chargeback_volume_total = register_counter_with_registry!(
            Opts::new("rewardrail_chargeback_volume_total", "Total charged-back amount"),
            registry
        )?;

        let postback_duration_seconds = register_histogram_with_registry!(
            HistogramOpts::new(
                "rewardrail_postback_duration_seconds",
                "Postback processing duration in seconds"
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5]),
            registry
        )?;

        Ok(Self {
            registry,
            postbacks_received_total,
            postbacks_applied_total,
            postbacks_ignored_total,
            postbacks_duplicate_total,
            postbacks_rejected_total,
            postbacks_failed_total,
            credited_volume_total,
            chargeback_volume_total,
            postback_duration_seconds,
        })
    }

    /// Export all metrics in Prometheus text format
    pub fn export(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn track_outcome(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Applied { kind, amount, .. } => {
                self.postbacks_applied_total.inc();
                let magnitude = amount.abs().to_f64().unwrap_or(0.0);
                match kind {
                    TxnKind::Credit => self.credited_volume_total.inc_by(magnitude),
                    TxnKind::Chargeback => self.chargeback_volume_total.inc_by(magnitude),
                }
            }
            Outcome::Ignored { .. } => self.postbacks_ignored_total.inc(),
            Outcome::DuplicateIgnored { .. } => self.postbacks_duplicate_total.inc(),
            Outcome::Rejected(_) => self.postbacks_rejected_total.inc(),
        }
    }
}

// Global metrics instance
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});
