//! Access policies for bundle entries.
//!
//! The policy is consulted once per dispatched entry, after route resolution
//! and before anything touches storage. A denied entry answers `403` with an
//! OperationOutcome whose diagnostics are [`AUTHORIZATION_FAILED`].

use std::sync::Arc;

use fhirkit_bundle::{ResolvedRoute, RouteKind};
use serde::{Deserialize, Serialize};

/// Diagnostics of every denied entry.
pub const AUTHORIZATION_FAILED: &str = "Authorization failed.";

/// Result of policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Access is granted.
    Allow,
    /// Access is denied with a reason (logged, never sent to the client).
    Deny(String),
}

impl AccessDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    #[must_use]
    pub fn deny_reason(&self) -> Option<&str> {
        match self {
            Self::Deny(reason) => Some(reason),
            Self::Allow => None,
        }
    }
}

pub trait AccessPolicy: Send + Sync {
    fn evaluate(&self, route: &ResolvedRoute) -> AccessDecision;

    fn name(&self) -> &'static str;
}

/// Grants every operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn evaluate(&self, _route: &ResolvedRoute) -> AccessDecision {
        AccessDecision::Allow
    }

    fn name(&self) -> &'static str {
        "allow_all"
    }
}

/// Grants reads and searches, denies everything that writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnly;

impl AccessPolicy for ReadOnly {
    fn evaluate(&self, route: &ResolvedRoute) -> AccessDecision {
        if !route.kind.is_write() {
            return AccessDecision::Allow;
        }
        let operation = match &route.kind {
            RouteKind::Create { .. } => "create",
            RouteKind::Update { .. } | RouteKind::ConditionalUpdate { .. } => "update",
            RouteKind::Patch { .. } => "patch",
            RouteKind::Delete { .. } | RouteKind::ConditionalDelete { .. } => "delete",
            RouteKind::Search { .. } | RouteKind::Read { .. } => "read",
        };
        AccessDecision::Deny(format!(
            "{operation} on {} requires write access",
            route.kind.resource_type()
        ))
    }

    fn name(&self) -> &'static str {
        "read_only"
    }
}

/// Policy selected in configuration (`auth.policy`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    AllowAll,
    ReadOnly,
}

impl PolicyKind {
    pub fn build(self) -> Arc<dyn AccessPolicy> {
        match self {
            PolicyKind::AllowAll => Arc::new(AllowAll),
            PolicyKind::ReadOnly => Arc::new(ReadOnly),
        }
    }
}
