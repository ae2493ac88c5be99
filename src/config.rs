//! Engine configuration.
//!
//! Owns the base API origin (from which both the REST origin and the push
//! channel origin are derived) and the payment provider's public key. The
//! public key only parameterizes the checkout widget; verification is
//! always server-side.

use std::time::Duration;

/// Default timeout for REST requests (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Path of the kitchen order feed on the push origin.
const KITCHEN_FEED_PATH: &str = "/ws/kitchen/orders/";

/// Normalise an API origin:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_origin(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Engine configuration shared by the REST client and the sync engine.
#[derive(Debug, Clone)]
pub struct Config {
    api_origin: String,
    /// Payment provider public key handed to the checkout widget.
    pub payment_public_key: String,
    /// Timeout applied to every REST request.
    pub request_timeout: Duration,
}

impl Config {
    pub fn new(api_origin: &str, payment_public_key: &str) -> Self {
        Self {
            api_origin: normalize_origin(api_origin),
            payment_public_key: payment_public_key.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Read configuration from the environment.
    ///
    /// `POS_API_BASE_URL` defaults to the local development server;
    /// `POS_PAYMENT_PUBLIC_KEY` defaults to empty (widget disabled).
    pub fn from_env() -> Self {
        let origin =
            std::env::var("POS_API_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into());
        let key = std::env::var("POS_PAYMENT_PUBLIC_KEY").unwrap_or_default();
        Self::new(&origin, &key)
    }

    /// The normalized REST origin.
    pub fn api_origin(&self) -> &str {
        &self.api_origin
    }

    /// The push-channel URL, derived from the REST origin by protocol
    /// substitution (`https` -> `wss`, `http` -> `ws`).
    pub fn ws_url(&self) -> String {
        let origin = if let Some(rest) = self.api_origin.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.api_origin.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.api_origin.clone()
        };
        format!("{origin}{KITCHEN_FEED_PATH}")
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_origin() {
        assert_eq!(normalize_origin("localhost:8000"), "http://localhost:8000");
        assert_eq!(
            normalize_origin("pos.example.com/"),
            "https://pos.example.com"
        );
        assert_eq!(
            normalize_origin("https://pos.example.com/api/"),
            "https://pos.example.com"
        );
        assert_eq!(
            normalize_origin("  http://127.0.0.1:8000/api  "),
            "http://127.0.0.1:8000"
        );
    }

    #[test]
    fn test_ws_url_protocol_substitution() {
        let cfg = Config::new("https://pos.example.com", "pk_test");
        assert_eq!(cfg.ws_url(), "wss://pos.example.com/ws/kitchen/orders/");

        let cfg = Config::new("localhost:8000", "pk_test");
        assert_eq!(cfg.ws_url(), "ws://localhost:8000/ws/kitchen/orders/");
    }
}
