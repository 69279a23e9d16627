// keepalive-service-rs/src/config.rs
// Environment-driven configuration, parsed once at startup.

use std::time::Duration;

use crate::probe::ProbeTarget;

pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_EXPECTED_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_PROBE_TARGET: &str = "keepalive_meta";

#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Expected bearer secret. None is a fatal misconfiguration surfaced as
    /// a 500 on every probe request.
    pub auth_token: Option<String>,
    pub ip_allowlist: Vec<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_bypass: bool,
    pub expected_interval: Duration,
    pub probe_target: ProbeTarget,
}

impl KeepaliveConfig {
    pub fn from_env() -> Self {
        Self {
            auth_token: config_rs::env_first(&["KEEPALIVE_AUTH_TOKEN", "SCHEDULER_TOKEN"]),
            ip_allowlist: config_rs::env_list("SCHEDULER_IP_ALLOWLIST"),
            rate_limit_window: Duration::from_secs(config_rs::env_u64(
                "KEEPALIVE_RATE_LIMIT_WINDOW_SECONDS",
                DEFAULT_RATE_LIMIT_WINDOW_SECS,
            )),
            rate_limit_bypass: config_rs::env_bool("KEEPALIVE_RATE_LIMIT_BYPASS", false),
            expected_interval: Duration::from_secs(config_rs::env_u64(
                "KEEPALIVE_EXPECTED_INTERVAL_SECONDS",
                DEFAULT_EXPECTED_INTERVAL_SECS,
            )),
            probe_target: ProbeTarget::parse(&config_rs::env_string(
                "KEEPALIVE_TABLE",
                DEFAULT_PROBE_TARGET,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so the env mutations stay sequential within this binary
    #[test]
    fn test_from_env_overrides_and_defaults() {
        std::env::set_var("KEEPALIVE_AUTH_TOKEN", "env-secret");
        std::env::set_var("SCHEDULER_IP_ALLOWLIST", "1.2.3.4, 5.6.7.8");
        std::env::set_var("KEEPALIVE_RATE_LIMIT_WINDOW_SECONDS", "15");
        std::env::set_var("KEEPALIVE_RATE_LIMIT_BYPASS", "true");
        std::env::set_var("KEEPALIVE_EXPECTED_INTERVAL_SECONDS", "120");
        std::env::set_var("KEEPALIVE_TABLE", "rpc:heartbeat");

        let config = KeepaliveConfig::from_env();
        assert_eq!(config.auth_token.as_deref(), Some("env-secret"));
        assert_eq!(config.ip_allowlist, vec!["1.2.3.4", "5.6.7.8"]);
        assert_eq!(config.rate_limit_window, Duration::from_secs(15));
        assert!(config.rate_limit_bypass);
        assert_eq!(config.expected_interval, Duration::from_secs(120));
        assert_eq!(
            config.probe_target,
            ProbeTarget::RpcCall("heartbeat".to_string())
        );

        // SCHEDULER_TOKEN is the fallback secret
        std::env::remove_var("KEEPALIVE_AUTH_TOKEN");
        std::env::set_var("SCHEDULER_TOKEN", "fallback-secret");
        assert_eq!(
            KeepaliveConfig::from_env().auth_token.as_deref(),
            Some("fallback-secret")
        );

        std::env::remove_var("SCHEDULER_TOKEN");
        std::env::remove_var("SCHEDULER_IP_ALLOWLIST");
        std::env::remove_var("KEEPALIVE_RATE_LIMIT_WINDOW_SECONDS");
        std::env::remove_var("KEEPALIVE_RATE_LIMIT_BYPASS");
        std::env::remove_var("KEEPALIVE_EXPECTED_INTERVAL_SECONDS");
        std::env::remove_var("KEEPALIVE_TABLE");

        let defaults = KeepaliveConfig::from_env();
        assert_eq!(defaults.auth_token, None);
        assert!(defaults.ip_allowlist.is_empty());
        assert_eq!(
            defaults.rate_limit_window,
            Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS)
        );
        assert!(!defaults.rate_limit_bypass);
        assert_eq!(
            defaults.expected_interval,
            Duration::from_secs(DEFAULT_EXPECTED_INTERVAL_SECS)
        );
        assert_eq!(
            defaults.probe_target,
            ProbeTarget::TableRead(DEFAULT_PROBE_TARGET.to_string())
        );
    }
}
