//! Chain validation against the single trusted root.
//!
//! Wraps `rustls-webpki` path building so that signature chain, validity
//! window and extended key usage are checked the same way the TLS stack
//! checks them. webpki never inspects the trust anchor itself, so the root's
//! own basic constraints are checked once at construction and its validity
//! window on every call.

use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{CertificateDer, SignatureVerificationAlgorithm, TrustAnchor, UnixTime};
use thiserror::Error;
use tracing::debug;
use webpki::{EndEntityCert, KeyUsage};

use super::Certificate;
use crate::keys::KeyError;

/// Chain validation errors.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Certificate bytes could not be decoded.
    #[error("certificate decode failed: {0}")]
    Decode(String),

    /// Subject key uses an unsupported algorithm.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The configured root does not assert `cA=true`.
    #[error("trusted root is not a CA certificate")]
    RootNotCa,

    /// The configured root is outside its validity window.
    #[error("trusted root is expired or not yet valid")]
    RootExpired,

    /// The certificate's `notAfter` has passed.
    #[error("certificate expired")]
    Expired,

    /// The certificate's `notBefore` is in the future.
    #[error("certificate not yet valid")]
    NotYetValid,

    /// The certificate was not issued by the trusted root.
    #[error("certificate signed by unknown authority")]
    UnknownIssuer,

    /// Any other path validation failure (bad signature, wrong usage, ...).
    #[error("certificate validation failed: {0}")]
    Invalid(webpki::Error),
}

impl From<webpki::Error> for ChainError {
    fn from(err: webpki::Error) -> Self {
        match err {
            webpki::Error::CertExpired { .. } => Self::Expired,
            webpki::Error::CertNotValidYet { .. } => Self::NotYetValid,
            webpki::Error::UnknownIssuer => Self::UnknownIssuer,
            other => Self::Invalid(other),
        }
    }
}

/// Purpose the end-entity certificate is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Caller authenticating to a server.
    Client,
    /// Server authenticating to a caller.
    Server,
}

impl Role {
    fn key_usage(self) -> KeyUsage {
        match self {
            Self::Client => KeyUsage::client_auth(),
            Self::Server => KeyUsage::server_auth(),
        }
    }
}

/// Validates certificates against one trusted root.
///
/// Holds only immutable data; share it behind an `Arc`.
#[derive(Debug)]
pub struct ChainValidator {
    root: Certificate,
    anchor: TrustAnchor<'static>,
    algorithms: &'static [&'static dyn SignatureVerificationAlgorithm],
}

impl ChainValidator {
    /// Build a validator for `root`.
    pub fn new(root: Certificate) -> Result<Self, ChainError> {
        if !root.is_ca() {
            return Err(ChainError::RootNotCa);
        }
        let root_der = CertificateDer::from(root.der());
        let anchor = webpki::anchor_from_trusted_cert(&root_der)
            .map_err(|e| ChainError::Decode(format!("invalid trust anchor: {e}")))?
            .to_owned();

        Ok(Self {
            root,
            anchor,
            algorithms: aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .all,
        })
    }

    /// The trusted root.
    #[must_use]
    pub fn root(&self) -> &Certificate {
        &self.root
    }

    /// Validate `cert` for `role` at the current time.
    pub fn validate(&self, cert: &Certificate, role: Role) -> Result<(), ChainError> {
        self.validate_at(cert, role, UnixTime::now())
    }

    /// Validate `cert` for `role` at `now`.
    pub fn validate_at(
        &self,
        cert: &Certificate,
        role: Role,
        now: UnixTime,
    ) -> Result<(), ChainError> {
        let secs = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
        if !self.root.is_valid_at(secs) {
            return Err(ChainError::RootExpired);
        }

        let der = CertificateDer::from(cert.der());
        let end_entity =
            EndEntityCert::try_from(&der).map_err(|e| ChainError::Decode(e.to_string()))?;
        end_entity.verify_for_usage(
            self.algorithms,
            std::slice::from_ref(&self.anchor),
            &[],
            now,
            role.key_usage(),
            None,
            None,
        )?;

        debug!(cn = ?cert.common_name(), ?role, "Certificate chain validated");
        Ok(())
    }
}
