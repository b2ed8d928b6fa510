//! Per-route authentication pipelines.
//!
//! A route is protected by an ordered list of [`AuthStage`]s and one
//! [`ProtectedOperation`]. Stages run in order; each receives the
//! [`Client`] resolved by the previous stage, if any, and returns the
//! client to pass on. The first [`AuthRejection`] halts the pipeline and
//! becomes the response. When every stage succeeds the final client is
//! handed to the operation as an argument.
//!
//! ```text
//! Request
//!   → stage 1 (e.g. SignedRequestStage)   → Client
//!   → stage 2 (e.g. RequireScopes)        → Client
//!   → ProtectedOperation::call(client, request)
//! ```
//!
//! A pipeline with no stages rejects every request.

pub mod audit;
mod rejection;
mod stages;

pub use rejection::AuthRejection;
pub use stages::{
    BearerTokenStage, PeerCertificateStage, PeerCertificates, RequireScopes, SignedRequestStage,
};

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::identity::Client;

use audit::AuditEvent;

/// One step of authentication.
#[async_trait]
pub trait AuthStage: Send + Sync {
    /// Short name used in logs and audit events.
    fn name(&self) -> &'static str;

    /// Resolve the caller or reject the request.
    ///
    /// `resolved` is the client produced by the preceding stage. Stages may
    /// read and replace the request body but must leave an equivalent one
    /// in place for later stages and the operation.
    async fn authenticate(
        &self,
        request: &mut Request<Body>,
        resolved: Option<&Client>,
    ) -> Result<Client, AuthRejection>;
}

/// The business handler behind a pipeline.
#[async_trait]
pub trait ProtectedOperation: Send + Sync {
    /// Handle an authenticated request.
    async fn call(&self, client: Client, request: Request<Body>) -> Response;
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered, immutable list of stages.
#[derive(Clone, Default)]
pub struct AuthPipeline {
    stages: Vec<Arc<dyn AuthStage>>,
}

impl std::fmt::Debug for AuthPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl AuthPipeline {
    /// Empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    #[must_use]
    pub fn stage(mut self, stage: impl AuthStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage and return the final client.
    ///
    /// Emits exactly one audit event.
    pub async fn run(&self, request: &mut Request<Body>) -> Result<Client, AuthRejection> {
        let path = request.uri().path().to_owned();

        let Some(last) = self.stages.last() else {
            let rejection = AuthRejection::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "no_auth_stage",
                "route has no authentication stage",
            );
            warn!(path = %path, "Pipeline without stages rejected request");
            audit::emit(&AuditEvent::rejected(&path, "none", None, &rejection));
            return Err(rejection);
        };

        let mut client: Option<Client> = None;
        for stage in &self.stages {
            match stage.authenticate(request, client.as_ref()).await {
                Ok(next) => {
                    debug!(stage = stage.name(), client = %next, "Stage passed");
                    client = Some(next);
                }
                Err(rejection) => {
                    warn!(
                        stage = stage.name(),
                        path = %path,
                        status = rejection.status().as_u16(),
                        reason = rejection.message(),
                        "Request rejected"
                    );
                    audit::emit(&AuditEvent::rejected(
                        &path,
                        stage.name(),
                        client.as_ref(),
                        &rejection,
                    ));
                    return Err(rejection);
                }
            }
        }

        // Every stage returned a client, so `client` is set once the loop ends.
        let client = client.ok_or_else(|| {
            AuthRejection::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "no_auth_stage",
                "no client resolved",
            )
        })?;
        audit::emit(&AuditEvent::accepted(&path, last.name(), &client));
        Ok(client)
    }
}

/// A pipeline bound to its operation; the unit mounted on a route.
#[derive(Clone)]
pub struct Protected {
    pipeline: AuthPipeline,
    operation: Arc<dyn ProtectedOperation>,
}

impl std::fmt::Debug for Protected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protected")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl Protected {
    /// Bind `operation` behind `pipeline`.
    pub fn new(pipeline: AuthPipeline, operation: impl ProtectedOperation + 'static) -> Self {
        Self {
            pipeline,
            operation: Arc::new(operation),
        }
    }

    /// Authenticate, then run the operation or render the rejection.
    pub async fn handle(&self, mut request: Request<Body>) -> Response {
        match self.pipeline.run(&mut request).await {
            Ok(client) => self.operation.call(client, request).await,
            Err(rejection) => rejection.into_response(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in operation
// ─────────────────────────────────────────────────────────────────────────────

/// Replies `Welcome <name>, you are authorized to <scope,scope>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Greeting;

#[async_trait]
impl ProtectedOperation for Greeting {
    async fn call(&self, client: Client, _request: Request<Body>) -> Response {
        (
            StatusCode::OK,
            format!(
                "Welcome {}, you are authorized to {}",
                client.name(),
                client.scopes()
            ),
        )
            .into_response()
    }
}
