// keepalive-service-rs/src/escalation.rs
// Per-route failure streaks with one-shot alerting: a streak crossing the
// threshold dispatches a single alert, and nothing re-fires until a success
// resets the streak.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use tokio::sync::RwLock;

use alerts::AlertSink;

use crate::event_log;

pub const ALERT_THRESHOLD: u32 = 2;
pub const ALERT_CONTEXT_EVENTS: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
struct FailureStreak {
    count: u32,
    alert_sent: bool,
}

// Streak state lives only for the process lifetime; a restart re-arms
// alerting from zero.
static STREAKS: Lazy<RwLock<HashMap<String, FailureStreak>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Record a failure for a route. Returns true when this failure crossed the
/// alert threshold and dispatched an alert.
pub async fn record_failure(route: &str, reason: &str, alerter: &dyn AlertSink) -> bool {
    let should_alert = {
        let mut streaks = STREAKS.write().await;
        let streak = streaks.entry(route.to_string()).or_default();
        streak.count += 1;
        if streak.count >= ALERT_THRESHOLD && !streak.alert_sent {
            streak.alert_sent = true;
            true
        } else {
            false
        }
    };

    if should_alert {
        let recent = event_log::last_error_events(route, ALERT_CONTEXT_EVENTS);
        let context: Vec<serde_json::Value> = recent
            .iter()
            .filter_map(|event| serde_json::to_value(event).ok())
            .collect();
        alerter.send_failure_alert(route, reason, &context).await;
    }

    should_alert
}

/// Record a success for a route, clearing the streak and re-arming alerts.
pub async fn record_success(route: &str) {
    let mut streaks = STREAKS.write().await;
    streaks.insert(route.to_string(), FailureStreak::default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAlerter {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for CountingAlerter {
        async fn send_failure_alert(
            &self,
            _route: &str,
            _reason: &str,
            _recent: &[serde_json::Value],
        ) {
            self.sent.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_alert_debounced_until_success() {
        let route = "streak-debounce-test";
        let alerter = CountingAlerter::default();

        assert!(!record_failure(route, "invalid token", &alerter).await);
        assert!(record_failure(route, "invalid token", &alerter).await);
        assert!(!record_failure(route, "invalid token", &alerter).await);
        assert_eq!(alerter.sent.load(Ordering::SeqCst), 1);

        // recovery clears the streak and re-arms alerting
        record_success(route).await;

        assert!(!record_failure(route, "rate limit exceeded", &alerter).await);
        assert!(record_failure(route, "rate limit exceeded", &alerter).await);
        assert!(!record_failure(route, "rate limit exceeded", &alerter).await);
        assert_eq!(alerter.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_failure_does_not_alert() {
        let route = "streak-single-test";
        let alerter = CountingAlerter::default();

        record_failure(route, "missing authorization", &alerter).await;
        assert_eq!(alerter.sent.load(Ordering::SeqCst), 0);
    }
}
