// keepalive-service-rs/src/handlers.rs
// HTTP surface: the keepalive probe route, its staleness-monitor companion,
// and the standard service furniture (root banner, liveness check).
//
// Pipeline per probe request, strictly in order:
//   authorization -> rate limit -> dependency probe -> outcome recording
// Each stage's failure short-circuits the rest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use alerts::AlertSink;
use visit_store::VisitStore;

use crate::auth::{self, AuthOutcome};
use crate::config::KeepaliveConfig;
use crate::escalation;
use crate::event_log::{self, ProbeEvent};
use crate::probe::{self, DependencyProbe};
use crate::rate_limit::{self, RateKey};
use crate::timefmt;

pub const KEEPALIVE_ROUTE: &str = "/internal/keepalive";
pub const MONITOR_ROUTE: &str = "/internal/keepalive/monitor";

/// Page tag under which successful probes are recorded
pub const VISIT_PAGE: &str = "internal/keepalive";

const SERVICE_NAME: &str = "keepalive-service";

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: KeepaliveConfig,
    pub store: Arc<dyn VisitStore>,
    /// None when the dependency client could not be built from the
    /// environment; reported as missing_config, not as a probe failure.
    pub probe: Option<Arc<dyn DependencyProbe>>,
    pub alerter: Arc<dyn AlertSink>,
}

/// Rejection taxonomy for the keepalive route
#[derive(Debug, Error)]
pub enum RequestFailure {
    #[error("missing authorization")]
    MissingAuthorization,
    #[error("scheduler token not configured")]
    TokenNotConfigured,
    #[error("invalid token")]
    InvalidToken,
    #[error("ip not allowed")]
    IpNotAllowed,
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
}

impl RequestFailure {
    fn status(&self) -> StatusCode {
        match self {
            RequestFailure::MissingAuthorization => StatusCode::UNAUTHORIZED,
            // A missing expected token silently disables health monitoring,
            // so it is a server fault, not a client auth failure.
            RequestFailure::TokenNotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            RequestFailure::InvalidToken | RequestFailure::IpNotAllowed => StatusCode::FORBIDDEN,
            RequestFailure::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusOk {
    pub status: &'static str,
    pub timestamp: String,
    #[serde(rename = "supabaseStatus")]
    pub supabase_status: u16,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct StatusError {
    pub status: &'static str,
    pub timestamp: String,
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub uptime_seconds: i64,
    pub status: String,
}

/// Build the service router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route(
            KEEPALIVE_ROUTE,
            get(keepalive_handler).post(keepalive_handler),
        )
        .route(MONITOR_ROUTE, get(monitor_handler).post(monitor_handler))
        .with_state(state)
}

struct RequestContext {
    timestamp: String,
    method: String,
    ip: Option<String>,
    masked_token: Option<String>,
    started: Instant,
}

impl RequestContext {
    fn event(
        &self,
        status_code: u16,
        dependency_code: Option<u16>,
        error: Option<String>,
    ) -> ProbeEvent {
        ProbeEvent {
            route: KEEPALIVE_ROUTE.to_string(),
            timestamp: self.timestamp.clone(),
            method: self.method.clone(),
            status_code,
            ip: self.ip.clone(),
            token_id_masked: self.masked_token.clone(),
            dependency_response_code: dependency_code,
            latency_ms: self.started.elapsed().as_millis() as u64,
            error,
        }
    }
}

async fn reject(state: &AppState, ctx: &RequestContext, failure: RequestFailure) -> Response {
    let status = failure.status();
    let message = failure.to_string();

    event_log::log_event(&ctx.event(status.as_u16(), None, Some(message.clone())));
    escalation::record_failure(KEEPALIVE_ROUTE, &message, state.alerter.as_ref()).await;

    let mut response = (
        status,
        Json(StatusError {
            status: "error",
            timestamp: ctx.timestamp.clone(),
            code: status.as_u16(),
            message,
        }),
    )
        .into_response();

    if let RequestFailure::RateLimited { retry_after_secs } = failure {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    }

    response
}

/// GET|POST /internal/keepalive - authenticated dependency probe
pub async fn keepalive_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let provided = auth::bearer_token(&headers);
    let ctx = RequestContext {
        timestamp: timefmt::timestamp_with_offset(),
        method: method.to_string(),
        ip: auth::client_ip(&headers),
        masked_token: provided.as_deref().map(auth::mask_token_id),
        started: Instant::now(),
    };

    match auth::authorize(
        &headers,
        state.config.auth_token.as_deref(),
        &state.config.ip_allowlist,
    ) {
        AuthOutcome::Ok => {}
        AuthOutcome::MissingToken => {
            return reject(&state, &ctx, RequestFailure::MissingAuthorization).await
        }
        AuthOutcome::Misconfigured => {
            return reject(&state, &ctx, RequestFailure::TokenNotConfigured).await
        }
        AuthOutcome::InvalidToken => {
            return reject(&state, &ctx, RequestFailure::InvalidToken).await
        }
        AuthOutcome::IpDenied => return reject(&state, &ctx, RequestFailure::IpNotAllowed).await,
    }

    let key = RateKey::new(ctx.masked_token.clone().unwrap_or_default(), ctx.ip.clone());
    if let Err(retry_after_secs) = rate_limit::try_acquire(
        key,
        state.config.rate_limit_window,
        state.config.rate_limit_bypass,
    )
    .await
    {
        return reject(&state, &ctx, RequestFailure::RateLimited { retry_after_secs }).await;
    }

    // Dependency probe with a single bounded retry; the HTTP status stays
    // 200 from here on. The numeric supabaseStatus field carries the
    // dependency's health to the caller.
    let (dependency_code, action) = match &state.probe {
        None => (0, "missing_config".to_string()),
        Some(probe) => {
            let code = probe::probe_with_retry(probe.as_ref(), |code, delay| {
                event_log::log_event(&ctx.event(
                    200,
                    Some(code),
                    Some(format!(
                        "dependency {} - retry in {}ms",
                        code,
                        delay.as_millis()
                    )),
                ));
            })
            .await;
            (code, probe.action())
        }
    };

    let succeeded = dependency_code == 200 || state.probe.is_none();
    let details = if dependency_code == 200 {
        "read success".to_string()
    } else if state.probe.is_none() {
        "missing_config".to_string()
    } else {
        "read error".to_string()
    };

    event_log::log_event(&ctx.event(
        200,
        Some(dependency_code),
        if dependency_code == 200 {
            None
        } else {
            Some(action)
        },
    ));

    if succeeded {
        // Durable last-success marker for the staleness monitor; failure to
        // write it must not fail the request.
        let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok());
        if let Err(err) = state
            .store
            .record_visit(VISIT_PAGE, user_agent, ctx.ip.as_deref())
            .await
        {
            log::warn!("Visit record write failed: {}", err);
        }
        escalation::record_success(KEEPALIVE_ROUTE).await;
    } else {
        escalation::record_failure(
            KEEPALIVE_ROUTE,
            &format!("dependency read failed ({})", dependency_code),
            state.alerter.as_ref(),
        )
        .await;
    }

    (
        StatusCode::OK,
        Json(StatusOk {
            status: "ok",
            timestamp: ctx.timestamp,
            supabase_status: dependency_code,
            details,
        }),
    )
        .into_response()
}

/// Staleness verdict for the most recent success marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    NoCalls,
    Stale,
    Recent,
}

pub fn classify_staleness(
    last: Option<DateTime<Utc>>,
    expected_interval: Duration,
    now: DateTime<Utc>,
) -> Staleness {
    match last {
        None => Staleness::NoCalls,
        Some(at) => {
            let age_ms = now.signed_duration_since(at).num_milliseconds();
            if age_ms > expected_interval.as_millis() as i64 {
                Staleness::Stale
            } else {
                Staleness::Recent
            }
        }
    }
}

/// GET|POST /internal/keepalive/monitor - scheduler staleness check
///
/// Always answers 200 for a successfully executed check: the monitoring call
/// and the monitored condition are different axes, and only the details field
/// (plus the alert side-channel) reports degradation. An outer watchdog must
/// never misread the monitor's own call pattern as a failure.
pub async fn monitor_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let timestamp = timefmt::timestamp_with_offset();

    // Same bearer secret as the probe route; any failure is a flat 401.
    let authorized = match (
        auth::bearer_token(&headers),
        state.config.auth_token.as_deref(),
    ) {
        (Some(provided), Some(expected)) => provided == expected,
        _ => false,
    };
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(StatusError {
                status: "error",
                timestamp,
                code: 401,
                message: "unauthorized".to_string(),
            }),
        )
            .into_response();
    }

    let last = match state.store.last_visit(VISIT_PAGE).await {
        Ok(last) => last,
        Err(err) => {
            // An unreadable store is indistinguishable from "never ran"
            log::warn!("Last visit lookup failed: {}", err);
            None
        }
    };

    let expected_secs = state.config.expected_interval.as_secs();
    let details = match classify_staleness(last, state.config.expected_interval, Utc::now()) {
        Staleness::NoCalls => {
            dispatch_monitor_alert(&state, "scheduler missed run (no calls recorded)").await;
            "no-calls"
        }
        Staleness::Stale => {
            dispatch_monitor_alert(
                &state,
                &format!("scheduler missed run (> {}s since last)", expected_secs),
            )
            .await;
            "stale"
        }
        Staleness::Recent => "recent",
    };

    (
        StatusCode::OK,
        Json(StatusOk {
            status: "ok",
            timestamp,
            supabase_status: 0,
            details: details.to_string(),
        }),
    )
        .into_response()
}

async fn dispatch_monitor_alert(state: &AppState, reason: &str) {
    let recent = event_log::last_error_events(KEEPALIVE_ROUTE, escalation::ALERT_CONTEXT_EVENTS);
    let context: Vec<serde_json::Value> = recent
        .iter()
        .filter_map(|event| serde_json::to_value(event).ok())
        .collect();
    state
        .alerter
        .send_failure_alert(KEEPALIVE_ROUTE, reason, &context)
        .await;
}

/// GET / - Root endpoint
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "Keepalive Monitoring Service",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /health",
            "GET|POST /internal/keepalive",
            "GET|POST /internal/keepalive/monitor",
        ]
    }))
}

/// GET /health - Liveness endpoint, exempt from auth and rate limiting
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = START_TIME.elapsed().as_secs() as i64;
    let store_healthy = state.store.is_healthy().await;

    let status = if store_healthy { "SERVING" } else { "DEGRADED" };

    Json(HealthResponse {
        healthy: store_healthy,
        service_name: SERVICE_NAME.to_string(),
        uptime_seconds: uptime,
        status: status.to_string(),
    })
}
