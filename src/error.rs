//! Error types for certauthz
//!
//! Per-request failures live next to the protocol that detects them
//! ([`crate::cert::ChainError`], [`crate::signature::SignatureError`],
//! [`crate::token::TokenError`]) and are turned into HTTP responses by the
//! pipeline. This type covers everything that happens outside a request:
//! configuration, credential loading and listener setup.

use std::io;

use thiserror::Error;

use crate::keys::KeyError;

/// Result type alias for certauthz
pub type Result<T> = std::result::Result<T, Error>;

/// certauthz errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Trust material missing or unreadable at process start.
    ///
    /// Fatal: the process must not begin serving with a partially loaded
    /// trust root.
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Key material could not be decoded
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Certificate could not be parsed or issued
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// TLS configuration error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error must abort process initialisation.
    #[must_use]
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, Self::Startup(_) | Self::Key(_) | Self::Tls(_))
    }
}
