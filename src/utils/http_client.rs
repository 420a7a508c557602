//! Shared HTTP client construction.

use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

use crate::config::Config;

/// Install the process-wide rustls `CryptoProvider` exactly once.
///
/// Both sqlx and reqwest link rustls here, so the provider must be
/// pinned explicitly before the first TLS handshake.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the process-wide `reqwest` client.
///
/// The client is shared by the source, sink, and OAuth calls; it
/// carries the global request timeout and the connection-pool limits
/// from configuration. Long-running streaming uploads override the
/// timeout per request.
pub fn build_shared_client(config: &Config) -> reqwest::Client {
    install_rustls_provider();

    reqwest::Client::builder()
        .timeout(config.http_client_timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(config.max_idle_conns.min(config.max_conns_per_host))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .unwrap_or_else(|error| {
            tracing::warn!(
                error = %error,
                "Failed to build configured HTTP client; falling back to defaults"
            );
            reqwest::Client::new()
        })
}
