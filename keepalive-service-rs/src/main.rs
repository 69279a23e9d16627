// keepalive-service-rs/src/main.rs
// Keepalive Monitoring Service - internal dependency probe + staleness monitor
//
// Implements:
// - Bearer-token authorization with optional scheduler IP allowlist
// - Per-caller rate limiting
// - Supabase connectivity probe with a single bounded retry
// - Durable last-success markers read by the staleness monitor
// - Failure-streak alerting to Slack/email

use std::sync::Arc;

use alerts::{AlertConfig, ChannelAlerter};
use keepalive_service::config::KeepaliveConfig;
use keepalive_service::handlers::{app, AppState};
use keepalive_service::probe::{DependencyProbe, SupabaseProbe};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = KeepaliveConfig::from_env();
    if config.auth_token.is_none() {
        log::warn!(
            "KEEPALIVE_AUTH_TOKEN is not configured; probe requests will be rejected with 500"
        );
    }

    let store = visit_store::create_visit_store().await?;
    store.initialize().await?;

    let probe = SupabaseProbe::from_env(config.probe_target.clone());
    match &probe {
        Some(probe) => log::info!("Dependency probe action: {}", probe.action()),
        None => {
            log::warn!("Supabase credentials not configured; probe will report missing_config")
        }
    }

    let alert_config = AlertConfig::from_env();
    if !alert_config.any_channel_configured() {
        log::warn!("No alert channels configured; failure alerts will be dropped");
    }

    let addr = config_rs::get_bind_address("KEEPALIVE", 8090);

    let state = AppState {
        config,
        store,
        probe: probe.map(|p| Arc::new(p) as Arc<dyn DependencyProbe>),
        alerter: Arc::new(ChannelAlerter::new(alert_config)),
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Keepalive service listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
