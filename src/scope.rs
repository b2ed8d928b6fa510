//! Authorization scopes and their certificate extension encoding.
//!
//! A scope is an opaque string such as `"bob.user.read"`. A leaf certificate
//! carries its scope set in a private, **non-critical** X.509 extension whose
//! value is the scopes joined by a single space. The extension is not
//! registered anywhere, so marking it critical would make every standard
//! verifier (rustls/webpki included) reject the certificate.
//!
//! The OID is declared once, here, and used by both the issuer and every
//! verifier.

use std::collections::BTreeSet;
use std::fmt;

use x509_parser::certificate::X509Certificate;

/// Arcs of the scope extension OID (`1.2.3.4`), as `rcgen` wants them.
pub const SCOPE_OID_ARCS: &[u64] = &[1, 2, 3, 4];

/// DER content octets of the scope extension OID, as `x509-parser` exposes them.
pub const SCOPE_OID_DER: &[u8] = &[0x2a, 0x03, 0x04];

/// Separator between scopes in the extension value.
const SEPARATOR: char = ' ';

/// A set of authorization scopes.
///
/// Membership is what matters; iteration order is lexicographic only so
/// that encoding and logs are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scopes(BTreeSet<String>);

impl Scopes {
    /// An empty scope set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an extension value.
    ///
    /// Splits on spaces; empty tokens are dropped, so an empty value (or a
    /// missing extension) yields the empty set. Non-UTF-8 bytes are replaced
    /// rather than rejected since a scope that cannot be spelled can never
    /// match a policy anyway.
    #[must_use]
    pub fn decode(value: &[u8]) -> Self {
        String::from_utf8_lossy(value)
            .split(SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Encode into an extension value.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.join(" ").into_bytes()
    }

    /// Read the scope extension of a parsed certificate.
    ///
    /// Absence of the extension is not an error: it means no scopes.
    #[must_use]
    pub fn from_certificate(cert: &X509Certificate<'_>) -> Self {
        cert.extensions()
            .iter()
            .find(|ext| ext.oid.as_bytes() == SCOPE_OID_DER)
            .map(|ext| Self::decode(ext.value))
            .unwrap_or_default()
    }

    /// Exact-match membership.
    #[must_use]
    pub fn has(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// `true` iff every `required` scope is present.
    ///
    /// Vacuously `true` for an empty `required` list. Callers that want
    /// "at least one scope" must check [`Scopes::is_empty`] themselves.
    #[must_use]
    pub fn has_all<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().all(|s| self.has(s.as_ref()))
    }

    /// `true` iff at least one scope starts with `prefix`.
    ///
    /// Used by the TLS scope-prefix policy. `str::starts_with` compares at
    /// most `prefix.len()` bytes and is false for shorter scopes.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.iter().any(|s| s.starts_with(prefix))
    }

    /// Number of scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when no scope is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate scopes in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Join all scopes with `sep`.
    #[must_use]
    pub fn join(&self, sep: &str) -> String {
        self.iter().collect::<Vec<_>>().join(sep)
    }
}

impl<S: Into<String>> FromIterator<S> for Scopes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join(","))
    }
}
