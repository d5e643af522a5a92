// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The webhook security envelope.
//!
//! Every check here runs before a request body reaches the event parser:
//! transport requirement, IP allow-list, per-peer rate limit, body size cap,
//! and secret verification. Secret comparison is constant-time in both the
//! shared-token and the HMAC path.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::ServerConfig;

/// Header carrying the shared webhook secret.
pub const HEADER_GITLAB_TOKEN: &str = "X-Gitlab-Token";
/// Header carrying an HMAC-SHA256 hex digest of the body.
pub const HEADER_HUB_SIGNATURE: &str = "X-Hub-Signature-256";
/// Header naming the event type.
pub const HEADER_GITLAB_EVENT: &str = "X-Gitlab-Event";

/// Security settings applied to `/webhook`.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Shared secret; empty disables secret verification.
    pub secret: String,
    /// Maximum accepted body size in bytes.
    pub max_body_size: u64,
    /// Per-peer requests allowed per minute.
    pub rate_limit_per_minute: u32,
    /// Peer IPs allowed to deliver webhooks. Empty allows all.
    pub allowed_ips: Vec<String>,
    /// Reject requests that did not arrive over TLS.
    pub require_tls: bool,
}

impl SecurityConfig {
    /// Build the envelope settings from the server section and the secret.
    pub fn from_server(server: &ServerConfig, secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            max_body_size: server.max_body_size,
            rate_limit_per_minute: server.rate_limit_per_minute,
            allowed_ips: server.allowed_ips.clone(),
            require_tls: server.require_tls,
        }
    }
}

struct RateLimiterState {
    counts: HashMap<String, u32>,
    window_start: Instant,
}

/// Per-peer request counter over fixed one-minute windows.
///
/// Deliberately coarse: when the window rolls, every counter resets at once.
/// Sufficient for smoothing adversarial traffic, not for precise QoS.
pub struct RateLimiter {
    limit: u32,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` requests per peer per minute.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new(RateLimiterState {
                counts: HashMap::new(),
                window_start: Instant::now(),
            }),
        }
    }

    /// Count a request from `peer` and report whether it is within the limit.
    pub fn allow(&self, peer: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.window_start.elapsed() > Duration::from_secs(60) {
            state.counts.clear();
            state.window_start = Instant::now();
        }
        let count = state.counts.entry(peer.to_string()).or_insert(0);
        *count += 1;
        *count <= self.limit
    }
}

/// Whether `peer_ip` may deliver webhooks.
pub fn ip_allowed(allowed: &[String], peer_ip: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|ip| ip == peer_ip)
}

/// Verify the webhook secret.
///
/// Accepts either the shared token header compared in constant time, or an
/// HMAC-SHA256 hex digest of the body (optionally prefixed `sha256=`). An
/// empty configured secret disables verification.
pub fn verify_secret(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    if secret.is_empty() {
        return true;
    }

    if let Some(token) = headers.get(HEADER_GITLAB_TOKEN).and_then(|v| v.to_str().ok()) {
        return bool::from(token.as_bytes().ct_eq(secret.as_bytes()));
    }

    if let Some(signature) = headers
        .get(HEADER_HUB_SIGNATURE)
        .and_then(|v| v.to_str().ok())
    {
        return verify_hmac(secret, body, signature);
    }

    warn!("Webhook carried neither a token nor a signature header");
    false
}

fn verify_hmac(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    bool::from(signature.as_bytes().ct_eq(expected.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_empty_secret_skips_verification() {
        assert!(verify_secret("", &HeaderMap::new(), b"{}"));
    }

    #[test]
    fn test_token_match() {
        let headers = headers_with(HEADER_GITLAB_TOKEN, "s3cret");
        assert!(verify_secret("s3cret", &headers, b"{}"));
    }

    #[test]
    fn test_token_mismatch() {
        let headers = headers_with(HEADER_GITLAB_TOKEN, "xyz");
        assert!(!verify_secret("abc", &headers, b"{}"));
    }

    #[test]
    fn test_missing_headers_fail() {
        assert!(!verify_secret("abc", &HeaderMap::new(), b"{}"));
    }

    #[test]
    fn test_hmac_signature_match() {
        let body = br#"{"build_id":42}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cret").unwrap();
        mac.update(body);
        let digest = hex::encode(mac.finalize().into_bytes());

        let headers = headers_with(HEADER_HUB_SIGNATURE, &format!("sha256={digest}"));
        assert!(verify_secret("s3cret", &headers, body));

        // Also without the prefix.
        let headers = headers_with(HEADER_HUB_SIGNATURE, &digest);
        assert!(verify_secret("s3cret", &headers, body));
    }

    #[test]
    fn test_hmac_signature_mismatch() {
        let headers = headers_with(HEADER_HUB_SIGNATURE, "sha256=deadbeef");
        assert!(!verify_secret("s3cret", &headers, b"{}"));
    }

    #[test]
    fn test_ip_allowed() {
        assert!(ip_allowed(&[], "203.0.113.5"));
        let allowed = vec!["203.0.113.5".to_string()];
        assert!(ip_allowed(&allowed, "203.0.113.5"));
        assert!(!ip_allowed(&allowed, "203.0.113.6"));
    }

    #[test]
    fn test_rate_limiter_counts_per_peer() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.allow("10.0.0.1"));
        }
        assert!(!limiter.allow("10.0.0.1"));
        // Another peer has its own counter.
        assert!(limiter.allow("10.0.0.2"));
    }

    #[test]
    fn test_rate_limiter_window_reset() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));

        // Age the window past a minute.
        limiter.state.lock().unwrap().window_start =
            Instant::now() - Duration::from_secs(61);

        assert!(limiter.allow("10.0.0.1"));
    }
}
