//! Signed-request authentication.
//!
//! A caller proves possession of the private key behind its certificate by
//! signing a canonical string built from the request:
//!
//! ```text
//! METHOD \n URI \n BODY_MD5 \n TIMESTAMP \n NONCE
//! ```
//!
//! The signature is RSA PKCS#1 v1.5 over SHA-256, carried as standard
//! base64 in `X-Signature` next to the certificate (`X-Client-Cert`), the
//! nonce (`X-Nonce`) and the Unix timestamp (`X-Timestamp`). No TLS is
//! required; replay is bounded by the timestamp window ([`ReplayWindow`]) and,
//! when enabled, by the [`NonceCache`].
//!
//! The body digest is MD5. It only detects accidental mutation; integrity
//! against an attacker comes from the signature over the whole string.

mod replay;

pub use replay::{NonceCache, ReplayWindow};

use axum::http::{HeaderMap, HeaderValue};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use rand::RngExt;
use thiserror::Error;

use crate::cert::Certificate;
use crate::keys::{KeyError, PrivateKey};
use crate::unix_now;

/// Header carrying the caller's base64 DER certificate.
pub const CLIENT_CERT_HEADER: &str = "x-client-cert";
/// Header carrying the base64 signature.
pub const SIGNATURE_HEADER: &str = "x-signature";
/// Header carrying the decimal nonce.
pub const NONCE_HEADER: &str = "x-nonce";
/// Header carrying the decimal Unix timestamp.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// Signed-request errors.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// `X-Timestamp` absent.
    #[error("timestamp header is missing")]
    MissingTimestamp,

    /// `X-Timestamp` is not a decimal integer.
    #[error("invalid timestamp: {0}")]
    MalformedTimestamp(String),

    /// Timestamp outside the tolerance window.
    #[error("timestamp is expired")]
    TimestampOutOfWindow {
        /// Verifier clock minus request timestamp, in seconds.
        skew: i64,
    },

    /// `X-Signature` is not valid base64.
    #[error("failed to decode signature: {0}")]
    Decode(String),

    /// Cryptographic verification failed.
    #[error("signature verification failed")]
    Mismatch,

    /// `X-Nonce` absent or empty while replay protection is on.
    #[error("nonce header is missing")]
    MissingNonce,

    /// Nonce already seen within the window.
    #[error("nonce has already been used")]
    NonceReused,

    /// Nonce cache at capacity; request refused.
    #[error("nonce cache is full")]
    NonceCacheFull,

    /// Request body exceeds the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured limit.
        limit: usize,
    },

    /// Request body could not be read to the end.
    #[error("failed to read request body: {0}")]
    Body(String),

    /// Signing failed on the caller side.
    #[error(transparent)]
    Key(#[from] KeyError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Canonical parameters
// ─────────────────────────────────────────────────────────────────────────────

/// The request fields bound into a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequestParams {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Absolute request URI, e.g. `http://localhost:8585/cert`.
    pub uri: String,
    /// Hex MD5 of the body, empty when there is no body.
    pub body_md5: String,
    /// Decimal Unix seconds.
    pub timestamp: String,
    /// Decimal random nonce.
    pub nonce: String,
}

impl SignedRequestParams {
    /// The exact string that is signed.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}",
            self.method, self.uri, self.body_md5, self.timestamp, self.nonce
        )
    }
}

/// Hex MD5 of `body`; the empty string for an empty body.
#[must_use]
pub fn body_digest(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    hex::encode(Md5::digest(body))
}

/// Sign `params` and return the base64 signature.
pub fn sign(key: &PrivateKey, params: &SignedRequestParams) -> Result<String, SignatureError> {
    let sig = key.sign_sha256(params.canonical().as_bytes())?;
    Ok(STANDARD.encode(sig))
}

/// Verify a base64 `signature` over `params` with the certificate's key.
///
/// Does not check the certificate chain or the timestamp window.
pub fn verify(
    cert: &Certificate,
    signature: &str,
    params: &SignedRequestParams,
) -> Result<(), SignatureError> {
    let sig = STANDARD
        .decode(signature.trim())
        .map_err(|e| SignatureError::Decode(e.to_string()))?;
    if cert
        .public_key()
        .verify_sha256(params.canonical().as_bytes(), &sig)
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Caller side
// ─────────────────────────────────────────────────────────────────────────────

/// The four authentication headers of a signed request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    /// Base64 DER certificate.
    pub client_cert: String,
    /// Base64 signature.
    pub signature: String,
    /// Decimal nonce.
    pub nonce: String,
    /// Decimal Unix timestamp.
    pub timestamp: String,
}

impl SignedHeaders {
    /// Sign a request now with a fresh random nonce.
    pub fn sign(
        key: &PrivateKey,
        cert_der: &[u8],
        method: &str,
        uri: &str,
        body: &[u8],
    ) -> Result<Self, SignatureError> {
        let nonce: u64 = rand::rng().random();
        Self::sign_with(key, cert_der, method, uri, body, unix_now(), nonce)
    }

    /// Sign with an explicit timestamp and nonce.
    pub fn sign_with(
        key: &PrivateKey,
        cert_der: &[u8],
        method: &str,
        uri: &str,
        body: &[u8],
        timestamp: i64,
        nonce: u64,
    ) -> Result<Self, SignatureError> {
        let params = SignedRequestParams {
            method: method.to_owned(),
            uri: uri.to_owned(),
            body_md5: body_digest(body),
            timestamp: timestamp.to_string(),
            nonce: nonce.to_string(),
        };
        Ok(Self {
            client_cert: STANDARD.encode(cert_der),
            signature: sign(key, &params)?,
            nonce: params.nonce,
            timestamp: params.timestamp,
        })
    }

    /// Write the headers into `headers`, replacing existing values.
    ///
    /// All values are base64 or decimal, so they are always valid header
    /// values; an invalid one is skipped.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in [
            (CLIENT_CERT_HEADER, &self.client_cert),
            (SIGNATURE_HEADER, &self.signature),
            (NONCE_HEADER, &self.nonce),
            (TIMESTAMP_HEADER, &self.timestamp),
        ] {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
    }
}
