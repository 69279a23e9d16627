// keepalive-service-rs/src/probe.rs
// Dependency prober: one lightweight authenticated read against the Supabase
// REST surface, with a single bounded retry on server-side failure.

use std::time::Duration;

use async_trait::async_trait;

const RETRY_BASE_DELAY_MS: u64 = 120;

/// Probe target, parsed once at configuration load.
///
/// The `rpc:` prefix in KEEPALIVE_TABLE selects a remote procedure call;
/// anything else is a head-style table read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    TableRead(String),
    RpcCall(String),
}

impl ProbeTarget {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.to_ascii_lowercase().starts_with("rpc:") {
            ProbeTarget::RpcCall(trimmed[4..].trim().to_string())
        } else {
            ProbeTarget::TableRead(trimmed.to_string())
        }
    }

    /// Action description used in logs
    pub fn describe(&self) -> String {
        match self {
            ProbeTarget::TableRead(table) => format!("select {} head limit 1", table),
            ProbeTarget::RpcCall(name) => format!("rpc {}", name),
        }
    }
}

/// Fixed delay before the single 5xx retry, kept short so the endpoint stays
/// fast for frequent scheduler calls.
pub fn retry_delay() -> Duration {
    Duration::from_millis((RETRY_BASE_DELAY_MS * 2).clamp(80, 300))
}

/// One read against the monitored dependency
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Perform one read attempt; returns 200 on success or the dependency's
    /// reported status code (500 when no status is available).
    async fn attempt_read(&self) -> u16;

    /// Action description for logs
    fn action(&self) -> String {
        "probe".to_string()
    }
}

/// Run a probe attempt, retrying exactly once when the first attempt reports
/// a 5xx code. `on_retry` observes the scheduled retry (first code, delay).
/// Whatever the second attempt returns is final.
pub async fn probe_with_retry<F>(probe: &dyn DependencyProbe, mut on_retry: F) -> u16
where
    F: FnMut(u16, Duration),
{
    let first = probe.attempt_read().await;
    if !(500..600).contains(&first) {
        return first;
    }

    let delay = retry_delay();
    on_retry(first, delay);
    tokio::time::sleep(delay).await;
    probe.attempt_read().await
}

/// Probe against the Supabase REST surface
pub struct SupabaseProbe {
    base_url: String,
    api_key: String,
    target: ProbeTarget,
    client: reqwest::Client,
}

impl SupabaseProbe {
    /// Build the probe from environment configuration.
    ///
    /// Returns None when the URL or key is absent; the caller reports
    /// missing_config instead of a probe failure.
    pub fn from_env(target: ProbeTarget) -> Option<Self> {
        let base_url = config_rs::env_first(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"])?;
        let api_key = config_rs::env_first(&[
            "SUPABASE_KEEPALIVE_KEY",
            "SUPABASE_READONLY_KEY",
            "SUPABASE_SERVICE_ROLE_KEY",
        ])?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;

        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            target,
            client,
        })
    }
}

#[async_trait]
impl DependencyProbe for SupabaseProbe {
    async fn attempt_read(&self) -> u16 {
        let request = match &self.target {
            ProbeTarget::TableRead(table) => self
                .client
                .head(format!("{}/rest/v1/{}", self.base_url, table))
                .query(&[("select", "*"), ("limit", "1")])
                .header("Prefer", "count=estimated"),
            ProbeTarget::RpcCall(name) => self
                .client
                .post(format!("{}/rest/v1/rpc/{}", self.base_url, name))
                .json(&serde_json::json!({})),
        };

        let result = request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => 200,
            Ok(response) => response.status().as_u16(),
            Err(err) => err.status().map(|s| s.as_u16()).unwrap_or(500),
        }
    }

    fn action(&self) -> String {
        self.target.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedProbe {
        codes: Mutex<Vec<u16>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(codes: &[u16]) -> Self {
            Self {
                codes: Mutex::new(codes.to_vec()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DependencyProbe for ScriptedProbe {
        async fn attempt_read(&self) -> u16 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut codes = self.codes.lock().unwrap();
            if codes.is_empty() {
                200
            } else {
                codes.remove(0)
            }
        }
    }

    #[test]
    fn test_parse_plain_table_name() {
        assert_eq!(
            ProbeTarget::parse("keepalive_meta"),
            ProbeTarget::TableRead("keepalive_meta".to_string())
        );
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(
            ProbeTarget::parse("  news  "),
            ProbeTarget::TableRead("news".to_string())
        );
    }

    #[test]
    fn test_parse_rpc_prefix_case_insensitive() {
        assert_eq!(
            ProbeTarget::parse("rpc:ping"),
            ProbeTarget::RpcCall("ping".to_string())
        );
        assert_eq!(
            ProbeTarget::parse("RPC: ping"),
            ProbeTarget::RpcCall("ping".to_string())
        );
    }

    #[test]
    fn test_retry_delay_stays_short() {
        let delay = retry_delay();
        assert!(delay >= Duration::from_millis(80));
        assert!(delay <= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let probe = ScriptedProbe::new(&[503, 200]);
        let mut retries = Vec::new();

        let code = probe_with_retry(&probe, |code, delay| retries.push((code, delay))).await;

        assert_eq!(code, 200);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].0, 503);
    }

    #[tokio::test]
    async fn test_no_retry_on_client_error() {
        let probe = ScriptedProbe::new(&[404]);
        let mut retries = 0;

        let code = probe_with_retry(&probe, |_, _| retries += 1).await;

        assert_eq!(code, 404);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries, 0);
    }

    #[tokio::test]
    async fn test_second_failure_is_final() {
        let probe = ScriptedProbe::new(&[503, 502]);

        let code = probe_with_retry(&probe, |_, _| {}).await;

        assert_eq!(code, 502);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }
}
