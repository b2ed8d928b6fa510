//! Outbound requests for each authentication scheme.

use std::fmt;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::{Method, Url};
use thiserror::Error;
use tracing::debug;

use crate::cert::Certificate;
use crate::keys::PrivateKey;
use crate::signature::{SignatureError, SignedHeaders};
use crate::tls;

/// Outbound request errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// URL could not be parsed
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// Request could not be signed
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Transport failure
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Client could not be built
    #[error("client setup failed: {0}")]
    Setup(String),
}

/// Status and body text of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// HTTP status
    pub status: StatusCode,
    /// Body as text
    pub body: String,
}

enum Scheme {
    Signed { key: PrivateKey, cert_der: Vec<u8> },
    Bearer(String),
    MutualTls,
}

impl fmt::Debug for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signed { .. } => f.write_str("Signed"),
            Self::Bearer(_) => f.write_str("Bearer"),
            Self::MutualTls => f.write_str("MutualTls"),
        }
    }
}

/// HTTP client that authenticates every request with one scheme.
#[derive(Debug)]
pub struct AuthClient {
    http: reqwest::Client,
    scheme: Scheme,
}

const TIMEOUT: Duration = Duration::from_secs(30);

impl AuthClient {
    /// Sign every request with `key`, presenting `cert`.
    pub fn signed(cert: &Certificate, key: PrivateKey) -> Result<Self, ClientError> {
        Ok(Self {
            http: plain_http()?,
            scheme: Scheme::Signed {
                key,
                cert_der: cert.der().to_vec(),
            },
        })
    }

    /// Send `Authorization: Bearer <token>`.
    pub fn bearer(token: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http: plain_http()?,
            scheme: Scheme::Bearer(token.into()),
        })
    }

    /// Present `cert` in a mutual-TLS handshake, trusting `root` for the server.
    pub fn mutual_tls(
        root: &Certificate,
        cert: &Certificate,
        key: &PrivateKey,
    ) -> Result<Self, ClientError> {
        let tls_config =
            tls::client_config(root, cert, key).map_err(|e| ClientError::Setup(e.to_string()))?;
        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls_config)
            .timeout(TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            scheme: Scheme::MutualTls,
        })
    }

    /// `GET url`.
    pub async fn get(&self, url: &str) -> Result<Reply, ClientError> {
        self.send(Method::GET, url, Vec::new()).await
    }

    /// Send a request with `body`, authenticated by the configured scheme.
    pub async fn send(&self, method: Method, url: &str, body: Vec<u8>) -> Result<Reply, ClientError> {
        let parsed = Url::parse(url).map_err(|e| ClientError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        match &self.scheme {
            Scheme::Signed { key, cert_der } => {
                SignedHeaders::sign(key, cert_der, method.as_str(), parsed.as_str(), &body)?
                    .apply(&mut headers);
            }
            Scheme::Bearer(token) => {
                let value: HeaderValue = format!("Bearer {token}")
                    .parse()
                    .map_err(|_| ClientError::Setup("token is not a valid header value".into()))?;
                headers.insert(axum::http::header::AUTHORIZATION, value);
            }
            Scheme::MutualTls => {}
        }

        debug!(%method, url = %parsed, scheme = ?self.scheme, "Sending request");
        let response = self
            .http
            .request(method, parsed)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(Reply { status, body })
    }
}

fn plain_http() -> Result<reqwest::Client, ClientError> {
    Ok(reqwest::Client::builder().timeout(TIMEOUT).build()?)
}
