//! Federation error types
//!
//! Each stage of a resolution fails with its own error. The orchestrator
//! wraps them in [`ResolveError`] together with the URI and the step at
//! which the resolution stopped.

use std::fmt;
use thiserror::Error;

use super::validator::ObjectKind;
use crate::data::DatabaseError;

/// Outbound fetch failure
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure, timeout or remote 5xx
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// URL rejected before any request was made
    #[error("unsafe url: {0}")]
    UnsafeUrl(String),

    /// A hop landed on a blocked domain
    #[error("blocked domain: {0}")]
    BlockedDomain(String),

    /// Remote answered 404
    #[error("remote object not found")]
    RemoteNotFound,

    /// Remote answered 410
    #[error("remote object is gone")]
    Gone,

    /// Any other non-success status
    #[error("unexpected status code {0}")]
    UnexpectedStatus(u16),

    /// Declared content type is not an accepted ActivityPub type
    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// Body exceeded the configured size limit
    #[error("response size exceeds {0} bytes")]
    ResponseTooLarge(usize),

    /// Body could not be decoded to a JSON document
    #[error("decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::UnsafeUrl(_) => "unsafe_url",
            Self::BlockedDomain(_) => "blocked",
            Self::RemoteNotFound => "not_found",
            Self::Gone => "gone",
            Self::UnexpectedStatus(_) => "unexpected_status",
            Self::UnexpectedContentType(_) => "unexpected_content_type",
            Self::ResponseTooLarge(_) => "too_large",
            Self::Decode(_) => "decode",
        }
    }
}

/// Fetched document does not have the expected shape
#[derive(Debug, Error)]
#[error("invalid {kind} document: {reason}")]
pub struct SchemaError {
    pub kind: ObjectKind,
    pub reason: String,
}

impl SchemaError {
    pub fn new(kind: ObjectKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Position of a resolution in its state machine
///
/// `Unresolved -> Fetching -> Validating -> ResolvingActor -> Materializing
/// -> Resolved`, with `Failed` reachable from every non-terminal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    Unresolved,
    Fetching,
    Validating,
    ResolvingActor,
    Materializing,
    Resolved,
    Failed,
}

impl ResolutionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Fetching => "fetching",
            Self::Validating => "validating",
            Self::ResolvingActor => "resolving_actor",
            Self::Materializing => "materializing",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Failed)
    }

    /// Whether `next` is a legal successor of this step
    ///
    /// Actor resolutions skip `ResolvingActor`, so `Validating` may move
    /// straight to `Materializing`. A local hit moves `Unresolved` straight
    /// to `Resolved`.
    pub fn can_advance_to(&self, next: ResolutionStep) -> bool {
        use ResolutionStep::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed)
                | (Unresolved, Fetching)
                | (Unresolved, Resolved)
                | (Fetching, Validating)
                | (Validating, ResolvingActor)
                | (Validating, Materializing)
                | (ResolvingActor, Materializing)
                | (Materializing, Resolved)
        )
    }
}

impl fmt::Display for ResolutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution failure for a single URI
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Local-only lookup missed
    #[error("no local record for {0}")]
    NotFound(String),

    #[error("resolution failed for {uri} at step {step}: {source}")]
    Fetch {
        uri: String,
        step: ResolutionStep,
        source: FetchError,
    },

    #[error("resolution failed for {uri} at step {step}: {source}")]
    Schema {
        uri: String,
        step: ResolutionStep,
        source: SchemaError,
    },

    /// The owning actor of an object could not be resolved
    #[error("resolution failed for {uri} at step resolving_actor: {source}")]
    Actor {
        uri: String,
        source: Box<ResolveError>,
    },

    /// Domain is on the blocklist; nothing was fetched
    #[error("domain {domain} is blocked ({uri})")]
    BlockedDomain { uri: String, domain: String },

    /// A uniqueness race could not be settled to a single record
    #[error("could not settle a single record for {0}")]
    ConflictRetryExhausted(String),

    #[error("resolution failed for {uri} at step {step}: {source}")]
    Store {
        uri: String,
        step: ResolutionStep,
        source: DatabaseError,
    },
}

impl ResolveError {
    /// URI whose resolution failed
    pub fn uri(&self) -> &str {
        match self {
            Self::NotFound(uri) | Self::ConflictRetryExhausted(uri) => uri,
            Self::Fetch { uri, .. }
            | Self::Schema { uri, .. }
            | Self::Actor { uri, .. }
            | Self::BlockedDomain { uri, .. }
            | Self::Store { uri, .. } => uri,
        }
    }

    /// Step at which the resolution stopped
    pub fn step(&self) -> ResolutionStep {
        match self {
            Self::NotFound(_) | Self::BlockedDomain { .. } => ResolutionStep::Unresolved,
            Self::Fetch { step, .. } | Self::Schema { step, .. } | Self::Store { step, .. } => {
                *step
            }
            Self::Actor { .. } => ResolutionStep::ResolvingActor,
            Self::ConflictRetryExhausted(_) => ResolutionStep::Materializing,
        }
    }

    /// Error of the innermost failed resolution
    pub fn root(&self) -> &ResolveError {
        match self {
            Self::Actor { source, .. } => source.root(),
            other => other,
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Fetch { .. } => "fetch",
            Self::Schema { .. } => "schema",
            Self::Actor { .. } => "actor",
            Self::BlockedDomain { .. } => "blocked",
            Self::ConflictRetryExhausted(_) => "conflict",
            Self::Store { .. } => "store",
        }
    }
}
