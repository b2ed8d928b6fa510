//! Audit trail for authentication decisions.
//!
//! Every pipeline run emits exactly one event via `tracing::info!`, with the
//! event serialized as JSON in the `audit` field:
//!
//! | Event | When |
//! |-------|------|
//! | `auth.accepted` | every stage succeeded and the protected operation runs |
//! | `auth.rejected` | a stage halted the request |
//!
//! Tokens, signatures and key material are never part of an event.

use serde::Serialize;

use crate::identity::{Client, ClientSummary};

use super::AuthRejection;

/// Structured audit event for one authentication decision.
#[derive(Debug, Serialize)]
pub struct AuditEvent<'a> {
    /// `"auth.accepted"` or `"auth.rejected"`.
    pub event: &'static str,
    /// Request path.
    pub path: &'a str,
    /// Name of the deciding stage (last stage on success).
    pub stage: &'static str,
    /// Resolved caller, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSummary<'a>>,
    /// HTTP status of the rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Reason for the rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
}

impl<'a> AuditEvent<'a> {
    /// Construct an `auth.accepted` event.
    #[must_use]
    pub fn accepted(path: &'a str, stage: &'static str, client: &'a Client) -> Self {
        Self {
            event: "auth.accepted",
            path,
            stage,
            client: Some(client.summary()),
            status: None,
            reason: None,
        }
    }

    /// Construct an `auth.rejected` event.
    #[must_use]
    pub fn rejected(
        path: &'a str,
        stage: &'static str,
        client: Option<&'a Client>,
        rejection: &'a AuthRejection,
    ) -> Self {
        Self {
            event: "auth.rejected",
            path,
            stage,
            client: client.map(Client::summary),
            status: Some(rejection.status().as_u16()),
            reason: Some(rejection.message()),
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
pub fn emit(event: &AuditEvent<'_>) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
