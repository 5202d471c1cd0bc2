//! Postback gateway: HTTP transport around the reconciliation engine.
//!
//! Receives provider callbacks, hands them to `reconcile_core`, and
//! renders each provider's required acknowledgement body and status
//! code. Everything here is plumbing; the design lives in the engine.

pub mod ack;
pub mod config;
pub mod handlers;
pub mod metrics;
