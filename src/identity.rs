//! Resolved caller identity.
//!
//! A [`Client`] is produced fresh by an authentication stage for one request
//! and handed, by value, to the next stage and finally to the protected
//! operation. It is never stored and cannot be modified after creation.

use std::fmt;

use serde::Serialize;

use crate::scope::Scopes;

/// The authenticated caller of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    name: String,
    scopes: Scopes,
}

impl Client {
    /// Create a resolved identity.
    pub fn new(name: impl Into<String>, scopes: Scopes) -> Self {
        Self {
            name: name.into(),
            scopes,
        }
    }

    /// Caller name (certificate CN, or token `sub`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scopes granted to the caller.
    #[must_use]
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Short label for audit events.
    #[must_use]
    pub fn summary(&self) -> ClientSummary<'_> {
        ClientSummary {
            name: &self.name,
            scopes: self.scopes.iter().collect(),
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.scopes)
    }
}

/// Borrowed, serialisable view of a [`Client`].
#[derive(Debug, Serialize)]
pub struct ClientSummary<'a> {
    /// Caller name.
    pub name: &'a str,
    /// Scopes, sorted.
    pub scopes: Vec<&'a str>,
}
