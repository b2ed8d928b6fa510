//! Configuration management

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::signature::ReplayWindow;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Credential directory layout
    pub credentials: CredentialsConfig,
    /// Signed-request replay protection
    pub replay: ReplayConfig,
    /// Bearer token validation
    pub token: TokenConfig,
    /// Mutual TLS policy
    pub tls: TlsConfig,
}

impl Config {
    /// Load configuration from an optional YAML file, then `CERTAUTHZ_*`
    /// environment variables (`__` separates nested keys).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("CERTAUTHZ_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot produce a working server.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.server.uri_scheme.as_str(), "http" | "https") {
            return Err(Error::Config(format!(
                "server.uri_scheme must be http or https, got '{}'",
                self.server.uri_scheme
            )));
        }
        if self.replay.window_secs == 0 {
            return Err(Error::Config("replay.window_secs must be positive".into()));
        }
        if self.replay.nonce_cache.enabled && self.replay.nonce_cache.capacity == 0 {
            return Err(Error::Config(
                "replay.nonce_cache.capacity must be positive when enabled".into(),
            ));
        }
        if self.credentials.authority.is_empty() || self.credentials.server_identity.is_empty() {
            return Err(Error::Config("credential names must not be empty".into()));
        }
        Ok(())
    }

    /// Scope prefix a TLS peer must hold; defaults to `"<server_identity>."`.
    #[must_use]
    pub fn required_scope_prefix(&self) -> String {
        self.tls
            .required_scope_prefix
            .clone()
            .unwrap_or_else(|| format!("{}.", self.credentials.server_identity))
    }

    /// Timestamp window for signed requests.
    #[must_use]
    pub fn replay_window(&self) -> ReplayWindow {
        ReplayWindow::new(self.replay.window_secs)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Serve `/` behind mutual TLS instead of the plain `/cert` and `/token` routes
    pub mtls: bool,
    /// Scheme used when rebuilding the signed URI
    pub uri_scheme: String,
    /// Maximum body drained for the signed-request digest (bytes)
    pub max_body_bytes: usize,
    /// Scopes every caller must hold on protected routes
    pub required_scopes: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8585,
            mtls: false,
            uri_scheme: "http".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            required_scopes: Vec::new(),
        }
    }
}

/// Credential directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Root holding one directory per identity
    pub path: PathBuf,
    /// Directory name of the certificate authority
    pub authority: String,
    /// Directory name of the server's own identity
    pub server_identity: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("../credentials"),
            authority: "primary".to_string(),
            server_identity: "bob".to_string(),
        }
    }
}

/// Replay protection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Accepted clock skew either side of now (seconds)
    pub window_secs: u64,
    /// Optional nonce cache
    pub nonce_cache: NonceCacheConfig,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            window_secs: 600,
            nonce_cache: NonceCacheConfig::default(),
        }
    }
}

/// Nonce cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceCacheConfig {
    /// Reject reused nonces within the window
    pub enabled: bool,
    /// Maximum live nonces; further requests get 503 until entries expire
    pub capacity: usize,
}

impl Default for NonceCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 100_000,
        }
    }
}

/// Token validation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Required audience name; `aud` must be `http://<audience>.local`
    pub audience: Option<String>,
}

/// Mutual TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Scope prefix required of TLS peers; empty disables the check
    pub required_scope_prefix: Option<String>,
}
