// keepalive-service-rs/src/event_log.rs
// Structured probe-attempt records: every request writes one single-line JSON
// event for downstream log sinks, and failed attempts are buffered per route
// so alerts can carry recent context.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const ERROR_BUFFER_CAP: usize = 20;

/// One probe attempt, as logged
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeEvent {
    pub route: String,
    pub timestamp: String,
    pub method: String,
    pub status_code: u16,
    pub ip: Option<String>,
    pub token_id_masked: Option<String>,
    pub dependency_response_code: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

// Recent failed attempts per route, oldest evicted first. Feeds alert
// payloads only; not persisted.
static ERROR_BUFFERS: Lazy<RwLock<HashMap<String, VecDeque<ProbeEvent>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Emit a probe event as single-line JSON and, when it carries an error,
/// keep it in the per-route buffer.
pub fn log_event(event: &ProbeEvent) {
    match serde_json::to_string(event) {
        Ok(line) => log::info!("{}", line),
        Err(err) => log::warn!("Failed to serialize probe event: {}", err),
    }

    if event.error.is_some() {
        push_error_event(event.clone());
    }
}

fn push_error_event(event: ProbeEvent) {
    let mut buffers = ERROR_BUFFERS.write().unwrap_or_else(|e| e.into_inner());
    let buffer = buffers.entry(event.route.clone()).or_default();
    buffer.push_back(event);
    while buffer.len() > ERROR_BUFFER_CAP {
        buffer.pop_front();
    }
}

/// The most recent `count` failed attempts for a route, oldest first
pub fn last_error_events(route: &str, count: usize) -> Vec<ProbeEvent> {
    let buffers = ERROR_BUFFERS.read().unwrap_or_else(|e| e.into_inner());
    match buffers.get(route) {
        Some(buffer) => {
            let skip = buffer.len().saturating_sub(count);
            buffer.iter().skip(skip).cloned().collect()
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(route: &str, error: Option<&str>, latency_ms: u64) -> ProbeEvent {
        ProbeEvent {
            route: route.to_string(),
            timestamp: "2026-08-06T10:00:00+02:00".to_string(),
            method: "GET".to_string(),
            status_code: if error.is_some() { 403 } else { 200 },
            ip: Some("1.2.3.4".to_string()),
            token_id_masked: Some("deadbeef0123".to_string()),
            dependency_response_code: None,
            latency_ms,
            error: error.map(|e| e.to_string()),
        }
    }

    #[test]
    fn test_only_errors_are_buffered() {
        let route = "buffer-errors-only";
        log_event(&event(route, None, 1));
        log_event(&event(route, Some("invalid token"), 2));

        let recent = last_error_events(route, 5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].error.as_deref(), Some("invalid token"));
    }

    #[test]
    fn test_buffer_caps_at_twenty() {
        let route = "buffer-cap";
        for i in 0..30 {
            log_event(&event(route, Some("rate limit exceeded"), i));
        }

        let all = last_error_events(route, ERROR_BUFFER_CAP + 10);
        assert_eq!(all.len(), ERROR_BUFFER_CAP);
        // oldest entries were evicted first
        assert_eq!(all[0].latency_ms, 10);
        assert_eq!(all.last().unwrap().latency_ms, 29);
    }

    #[test]
    fn test_last_n_are_newest_oldest_first() {
        let route = "buffer-last-n";
        for i in 0..8 {
            log_event(&event(route, Some("ip not allowed"), i));
        }

        let recent = last_error_events(route, 5);
        assert_eq!(
            recent.iter().map(|e| e.latency_ms).collect::<Vec<_>>(),
            vec![3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn test_unknown_route_has_no_events() {
        assert!(last_error_events("buffer-unknown-route", 5).is_empty());
    }

    #[test]
    fn test_event_serializes_with_wire_field_names() {
        let line = serde_json::to_string(&event("wire-names", Some("x"), 7)).unwrap();
        assert!(line.contains("\"statusCode\""));
        assert!(line.contains("\"tokenIdMasked\""));
        assert!(line.contains("\"latencyMs\""));
        assert!(line.contains("\"dependencyResponseCode\""));
    }
}
