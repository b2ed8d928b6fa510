//! certauthz Library
//!
//! Service-to-service authorization inside a private network anchored by a
//! single self-issued certificate authority. Every caller holds an RSA key
//! and a certificate whose scope extension lists what it may do.
//!
//! # Schemes
//!
//! - **Signed request**: certificate in a header plus an RSA signature over
//!   the canonical request, no TLS required ([`signature`])
//! - **Bearer token**: RS256 token counter-signed by the authority ([`token`])
//! - **Mutual TLS**: peer certificate checked against a scope prefix during
//!   the handshake ([`tls`])
//!
//! Each protected route runs one [`pipeline::AuthPipeline`] that resolves a
//! [`identity::Client`] and passes it to the handler as an argument.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cert;
pub mod cli;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod keys;
pub mod pipeline;
pub mod scope;
pub mod server;
pub mod signature;
pub mod tls;
pub mod token;

#[cfg(test)]
mod fixtures;

pub use error::{Error, Result};

use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
