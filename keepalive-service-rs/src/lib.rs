//! Internal keepalive endpoint and scheduler health monitor.
//!
//! An external scheduler probes `/internal/keepalive` on a fixed interval;
//! the route authorizes the caller, rate limits it, performs one lightweight
//! read against the Supabase REST surface (with a single bounded retry), and
//! records a durable last-success marker. `/internal/keepalive/monitor`
//! independently checks that marker's age, catching a scheduler that stopped
//! firing and not just one whose probes fail.

pub mod auth;
pub mod config;
pub mod escalation;
pub mod event_log;
pub mod handlers;
pub mod probe;
pub mod rate_limit;
pub mod timefmt;

pub use handlers::{app, AppState};

#[cfg(test)]
mod tests;
