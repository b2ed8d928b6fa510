//! Key material.
//!
//! Keys cross the process boundary as DER: PKCS#8 for private keys and
//! PKIX `SubjectPublicKeyInfo` for public keys (the latter is also what a
//! certificate embeds). Both decode into a tagged variant so that every
//! consumer matches on the algorithm instead of assuming one. Only RSA is
//! supported; any other algorithm is rejected here with the offending OID.

use std::fmt;

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{self, RsaKeyPair, UnparsedPublicKey};
use thiserror::Error;
use x509_parser::der_parser::ber::BerObject;
use x509_parser::der_parser::parse_der;
use x509_parser::oid_registry::OID_PKCS1_RSAENCRYPTION;
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;

/// Key decoding and usage errors.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key uses an algorithm other than RSA.
    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The DER structure could not be decoded.
    #[error("malformed key: {0}")]
    Malformed(String),

    /// The key decoded but could not be used to sign.
    #[error("signing failed")]
    Signing,
}

// ─────────────────────────────────────────────────────────────────────────────
// Private keys
// ─────────────────────────────────────────────────────────────────────────────

/// A private key of a supported algorithm.
#[derive(Debug)]
pub enum PrivateKey {
    /// RSA private key.
    Rsa(RsaPrivateKey),
}

/// An RSA private key loaded from PKCS#8.
pub struct RsaPrivateKey {
    pkcs8: Vec<u8>,
    pkcs1: Vec<u8>,
    key_pair: RsaKeyPair,
}

impl fmt::Debug for RsaPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPrivateKey")
            .field("modulus_bits", &(self.key_pair.public_modulus_len() * 8))
            .finish_non_exhaustive()
    }
}

impl PrivateKey {
    /// Decode a DER-encoded PKCS#8 `PrivateKeyInfo`.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, KeyError> {
        let (_, info) = parse_der(der).map_err(|e| KeyError::Malformed(e.to_string()))?;
        let fields = info
            .as_sequence()
            .map_err(|e| KeyError::Malformed(e.to_string()))?;

        let algorithm = fields
            .get(1)
            .ok_or_else(|| KeyError::Malformed("missing algorithm identifier".into()))?;
        let oid = algorithm_oid(algorithm)?;
        if oid != OID_PKCS1_RSAENCRYPTION.to_id_string() {
            return Err(KeyError::UnsupportedAlgorithm(oid));
        }

        let pkcs1 = fields
            .get(2)
            .and_then(|f| f.as_slice().ok())
            .ok_or_else(|| KeyError::Malformed("missing private key octets".into()))?
            .to_vec();
        let key_pair =
            RsaKeyPair::from_pkcs8(der).map_err(|e| KeyError::Malformed(e.to_string()))?;

        Ok(Self::Rsa(RsaPrivateKey {
            pkcs8: der.to_vec(),
            pkcs1,
            key_pair,
        }))
    }

    /// Sign `message` with RSA PKCS#1 v1.5 over SHA-256.
    pub fn sign_sha256(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        match self {
            Self::Rsa(key) => {
                let mut sig = vec![0u8; key.key_pair.public_modulus_len()];
                key.key_pair
                    .sign(
                        &signature::RSA_PKCS1_SHA256,
                        &SystemRandom::new(),
                        message,
                        &mut sig,
                    )
                    .map_err(|_| KeyError::Signing)?;
                Ok(sig)
            }
        }
    }

    /// The original PKCS#8 encoding.
    #[must_use]
    pub fn pkcs8_der(&self) -> &[u8] {
        match self {
            Self::Rsa(key) => &key.pkcs8,
        }
    }

    /// The inner PKCS#1 `RSAPrivateKey` encoding (what JWT libraries expect).
    #[must_use]
    pub fn pkcs1_der(&self) -> &[u8] {
        match self {
            Self::Rsa(key) => &key.pkcs1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public keys
// ─────────────────────────────────────────────────────────────────────────────

/// A public key of a supported algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    /// RSA public key, held as PKCS#1 `RSAPublicKey` DER.
    Rsa(Vec<u8>),
}

impl PublicKey {
    /// Decode a DER-encoded PKIX `SubjectPublicKeyInfo`.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, KeyError> {
        let (_, spki) =
            SubjectPublicKeyInfo::from_der(der).map_err(|e| KeyError::Malformed(e.to_string()))?;
        Self::from_spki(&spki)
    }

    /// Convert an already-parsed `SubjectPublicKeyInfo`.
    pub fn from_spki(spki: &SubjectPublicKeyInfo<'_>) -> Result<Self, KeyError> {
        if spki.algorithm.algorithm != OID_PKCS1_RSAENCRYPTION {
            return Err(KeyError::UnsupportedAlgorithm(
                spki.algorithm.algorithm.to_id_string(),
            ));
        }
        Ok(Self::Rsa(spki.subject_public_key.data.to_vec()))
    }

    /// Verify an RSA PKCS#1 v1.5 SHA-256 signature over `message`.
    #[must_use]
    pub fn verify_sha256(&self, message: &[u8], sig: &[u8]) -> bool {
        match self {
            Self::Rsa(pkcs1) => {
                UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, pkcs1)
                    .verify(message, sig)
                    .is_ok()
            }
        }
    }

    /// PKCS#1 `RSAPublicKey` DER.
    #[must_use]
    pub fn pkcs1_der(&self) -> &[u8] {
        match self {
            Self::Rsa(pkcs1) => pkcs1,
        }
    }
}

fn algorithm_oid(algorithm: &BerObject<'_>) -> Result<String, KeyError> {
    algorithm
        .as_sequence()
        .ok()
        .and_then(|seq| seq.first())
        .and_then(|oid| oid.as_oid().ok())
        .map(|oid| oid.to_id_string())
        .ok_or_else(|| KeyError::Malformed("invalid algorithm identifier".into()))
}
