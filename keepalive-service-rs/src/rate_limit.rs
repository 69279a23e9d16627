// keepalive-service-rs/src/rate_limit.rs
// Per-caller rate limiting using an in-memory sliding window: one accepted
// request per (token digest, ip) key per window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tokio::sync::RwLock;

/// Structured limiter key: masked token digest plus caller ip
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    token_digest: String,
    ip: Option<String>,
}

impl RateKey {
    pub fn new(token_digest: impl Into<String>, ip: Option<String>) -> Self {
        Self {
            token_digest: token_digest.into(),
            ip,
        }
    }
}

// Global map of key -> last accepted instant. Entries are never evicted;
// key cardinality is bounded by the set of scheduler callers.
static LAST_ACCEPTED: Lazy<RwLock<HashMap<RateKey, Instant>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Try to accept a request for the given key.
///
/// Returns Err(retry_after_seconds) when the key was accepted less than a
/// full window ago. With bypass enabled, always allows and records nothing.
pub async fn try_acquire(key: RateKey, window: Duration, bypass: bool) -> Result<(), u64> {
    if bypass {
        return Ok(());
    }
    try_acquire_at(key, window, Instant::now()).await
}

pub(crate) async fn try_acquire_at(
    key: RateKey,
    window: Duration,
    now: Instant,
) -> Result<(), u64> {
    let mut map = LAST_ACCEPTED.write().await;

    if let Some(last) = map.get(&key) {
        let elapsed = now.saturating_duration_since(*last);
        if elapsed < window {
            let remaining_ms = (window - elapsed).as_millis() as u64;
            return Err((remaining_ms + 999) / 1000);
        }
    }

    map.insert(key, now);
    Ok(())
}
