//! Bearer tokens counter-signed by the authority.
//!
//! Tokens are RS256 JWTs. The claim shape is fixed:
//!
//! | claim    | value                        |
//! |----------|------------------------------|
//! | `sub`    | `"<client>.local"`           |
//! | `aud`    | `"http://<audience>.local"`  |
//! | `iat`    | issue time, Unix seconds     |
//! | `exp`    | expiry, Unix seconds         |
//! | `scopes` | array of scope strings       |
//!
//! Validation checks the signature against the authority public key and
//! `exp` with zero leeway. `aud` is only checked when the validator is
//! built with an audience.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::identity::Client;
use crate::keys::{PrivateKey, PublicKey};
use crate::scope::Scopes;
use crate::unix_now;

/// Token errors.
#[derive(Debug, Error)]
pub enum TokenError {
    /// `Authorization` header is not `Bearer <token>`.
    #[error("invalid token")]
    MalformedHeader,

    /// `exp` has passed.
    #[error("token is expired")]
    Expired,

    /// Signature, structure or audience check failed.
    #[error("invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),

    /// Token could not be signed.
    #[error("token signing failed: {0}")]
    Encode(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid(err),
        }
    }
}

/// `sub` claim for a client name.
#[must_use]
pub fn subject_for(client_name: &str) -> String {
    format!("{client_name}.local")
}

/// `aud` claim for an audience name.
#[must_use]
pub fn audience_for(audience_name: &str) -> String {
    format!("http://{audience_name}.local")
}

// ─────────────────────────────────────────────────────────────────────────────
// Claims
// ─────────────────────────────────────────────────────────────────────────────

/// Token claim set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, `"<client>.local"`.
    #[serde(default)]
    pub sub: String,
    /// Audience, `"http://<audience>.local"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Issued at.
    #[serde(default)]
    pub iat: i64,
    /// Expires at.
    pub exp: i64,
    /// Granted scopes; a missing or malformed claim reads as empty.
    #[serde(default, deserialize_with = "lenient_scopes")]
    pub scopes: Vec<String>,
}

fn lenient_scopes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

/// Resolve the caller from validated claims.
///
/// The name is `sub` verbatim. An empty scope set is a valid result;
/// callers authorizing on scopes must check for it.
#[must_use]
pub fn identity_from_claims(claims: &Claims) -> Client {
    Client::new(
        claims.sub.clone(),
        claims.scopes.iter().map(String::as_str).collect(),
    )
}

/// Extract the token from an `Authorization` header value.
///
/// The value must be exactly `Bearer <token>`, split on single spaces.
pub fn bearer_token(header: &str) -> Result<&str, TokenError> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Ok(token),
        _ => Err(TokenError::MalformedHeader),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Issuer
// ─────────────────────────────────────────────────────────────────────────────

/// Signs tokens with the authority private key.
pub struct TokenIssuer {
    key: EncodingKey,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Build an issuer from the authority key.
    #[must_use]
    pub fn new(authority_key: &PrivateKey) -> Self {
        Self {
            key: EncodingKey::from_rsa_der(authority_key.pkcs1_der()),
        }
    }

    /// Issue a token valid for `ttl` from now.
    pub fn issue(
        &self,
        client_name: &str,
        audience_name: &str,
        scopes: &Scopes,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.issue_at(client_name, audience_name, scopes, ttl, unix_now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        client_name: &str,
        audience_name: &str,
        scopes: &Scopes,
        ttl: Duration,
        now: i64,
    ) -> Result<String, TokenError> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: subject_for(client_name),
            aud: Some(audience_for(audience_name)),
            iat: now,
            exp: now.saturating_add(ttl),
            scopes: scopes.iter().map(str::to_owned).collect(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(TokenError::Encode)?;
        debug!(sub = %claims.sub, exp = claims.exp, "Issued token");
        Ok(token)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validator
// ─────────────────────────────────────────────────────────────────────────────

/// Validates tokens against the authority public key.
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("audience", &self.validation.aud)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Build a validator; `audience` is the bare audience name, if enforced.
    #[must_use]
    pub fn new(authority_key: &PublicKey, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        match audience {
            Some(name) => validation.set_audience(&[audience_for(name)]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_rsa_der(authority_key.pkcs1_der()),
            validation,
        }
    }

    /// Verify signature and expiry and return the claims.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }
}
