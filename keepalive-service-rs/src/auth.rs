// keepalive-service-rs/src/auth.rs
// Bearer-token authorization and optional IP allowlisting for the internal
// monitoring routes. The secret is an internal scheduler credential, not a
// user session token; comparison is a plain equality check.

use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};

/// Authorization outcome for a monitoring request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Ok,
    MissingToken,
    Misconfigured,
    InvalidToken,
    IpDenied,
}

/// Extract the bearer token from the Authorization header.
///
/// Returns None when the header is absent or does not carry a bearer scheme.
/// An empty token after the scheme is returned as-is so it fails the
/// equality check instead of being reported as missing.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    if raw.len() < 7 || !raw[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }
    Some(raw[7..].trim().to_string())
}

/// Caller IP, taken from the first entry of x-forwarded-for
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let fwd = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = fwd.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

/// Check the caller IP against the configured allowlist.
///
/// An empty allowlist accepts every caller (open by default, documented
/// policy); a non-empty allowlist rejects unknown IPs.
pub fn ip_allowed(allowlist: &[String], ip: Option<&str>) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    match ip {
        Some(ip) => allowlist.iter().any(|allowed| allowed == ip),
        None => false,
    }
}

/// Full authorization decision for a request
pub fn authorize(
    headers: &HeaderMap,
    expected_token: Option<&str>,
    allowlist: &[String],
) -> AuthOutcome {
    let provided = match bearer_token(headers) {
        Some(token) => token,
        None => return AuthOutcome::MissingToken,
    };
    let expected = match expected_token {
        Some(token) => token,
        None => return AuthOutcome::Misconfigured,
    };
    if provided != expected {
        return AuthOutcome::InvalidToken;
    }
    if !ip_allowed(allowlist, client_ip(headers).as_deref()) {
        return AuthOutcome::IpDenied;
    }
    AuthOutcome::Ok
}

/// Short stable digest of the token for logs; never log the raw secret.
pub fn mask_token_id(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<String>()[..12]
        .to_string()
}
