//! Steps shared by post and actor resolution
//!
//! [`ResolutionTrace`] walks one resolution through its state machine,
//! logging each transition and turning stage errors into [`ResolveError`]s
//! that carry the URI and the step that failed.

use std::sync::Arc;

use super::domain::{DomainBlocklist, extract_domain};
use super::error::{FetchError, ResolutionStep, ResolveError, SchemaError};
use super::negotiator::ContentNegotiator;
use super::validator::{ObjectKind, ValidatedDocument, validate};
use crate::data::DatabaseError;

/// How a successful resolution was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Local record, no network access
    Local,
    /// Fetched; this call inserted the record
    Created,
    /// Fetched; the record already existed or a concurrent call won
    Existing,
    /// Fetched and an existing record was updated in place
    Refreshed,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Created => "created",
            Self::Existing => "existing",
            Self::Refreshed => "refreshed",
        }
    }
}

/// State of one in-flight resolution
pub struct ResolutionTrace<'a> {
    kind: ObjectKind,
    uri: &'a str,
    step: ResolutionStep,
}

impl<'a> ResolutionTrace<'a> {
    pub fn new(kind: ObjectKind, uri: &'a str) -> Self {
        Self {
            kind,
            uri,
            step: ResolutionStep::Unresolved,
        }
    }

    pub fn uri(&self) -> &'a str {
        self.uri
    }

    pub fn step(&self) -> ResolutionStep {
        self.step
    }

    pub fn advance(&mut self, next: ResolutionStep) {
        debug_assert!(
            self.step.can_advance_to(next),
            "illegal transition {} -> {}",
            self.step,
            next
        );
        tracing::trace!(
            kind = %self.kind,
            uri = %self.uri,
            from = %self.step,
            to = %next,
            "Resolution step"
        );
        self.step = next;
    }

    /// Finish successfully
    pub fn resolved(&mut self, outcome: Outcome) {
        self.advance(ResolutionStep::Resolved);
        use crate::metrics::RESOLUTIONS_TOTAL;
        RESOLUTIONS_TOTAL
            .with_label_values(&[self.kind.as_str(), outcome.as_str()])
            .inc();
        tracing::debug!(kind = %self.kind, uri = %self.uri, outcome = outcome.as_str(), "Resolved");
    }

    /// Finish with `error`, which is returned for propagation
    pub fn fail(&mut self, error: ResolveError) -> ResolveError {
        let failed_at = self.step;
        self.advance(ResolutionStep::Failed);
        use crate::metrics::RESOLUTIONS_TOTAL;
        RESOLUTIONS_TOTAL
            .with_label_values(&[self.kind.as_str(), error.label()])
            .inc();
        tracing::info!(
            kind = %self.kind,
            uri = %self.uri,
            step = %failed_at,
            error = %error,
            "Resolution failed"
        );
        error
    }

    pub fn fetch_error(&mut self, source: FetchError) -> ResolveError {
        let error = match source {
            FetchError::BlockedDomain(domain) => ResolveError::BlockedDomain {
                uri: self.uri.to_string(),
                domain,
            },
            source => ResolveError::Fetch {
                uri: self.uri.to_string(),
                step: self.step,
                source,
            },
        };
        self.fail(error)
    }

    pub fn schema_error(&mut self, source: SchemaError) -> ResolveError {
        let error = ResolveError::Schema {
            uri: self.uri.to_string(),
            step: self.step,
            source,
        };
        self.fail(error)
    }

    pub fn store_error(&mut self, source: DatabaseError) -> ResolveError {
        let error = ResolveError::Store {
            uri: self.uri.to_string(),
            step: self.step,
            source,
        };
        self.fail(error)
    }

    pub fn not_found(&mut self) -> ResolveError {
        self.fail(ResolveError::NotFound(self.uri.to_string()))
    }
}

/// Network side of a resolution: blocklist, fetch, validate
#[derive(Clone)]
pub struct Fetcher {
    pub negotiator: Arc<ContentNegotiator>,
    pub blocklist: Arc<DomainBlocklist>,
}

impl Fetcher {
    /// Reject URIs on blocked domains before any network access
    pub fn check_blocked(&self, trace: &mut ResolutionTrace<'_>) -> Result<(), ResolveError> {
        let uri = trace.uri;
        self.check_domain(trace, uri)
    }

    /// Fail `trace` if `uri` is on a blocked domain
    fn check_domain(&self, trace: &mut ResolutionTrace<'_>, uri: &str) -> Result<(), ResolveError> {
        let Some(domain) = extract_domain(uri) else {
            return Ok(());
        };
        if let Some(entry) = self.blocklist.matching_entry(&domain) {
            tracing::info!(uri = %uri, domain = %domain, entry = %entry, "Blocked domain");
            return Err(trace.fail(ResolveError::BlockedDomain {
                uri: trace.uri.to_string(),
                domain,
            }));
        }
        Ok(())
    }

    /// Fetch `trace`'s URI and validate it as `kind`
    ///
    /// Leaves the trace in `Validating` on success.
    pub async fn fetch_validated(
        &self,
        trace: &mut ResolutionTrace<'_>,
        kind: ObjectKind,
    ) -> Result<ValidatedDocument, ResolveError> {
        self.check_blocked(trace)?;

        trace.advance(ResolutionStep::Fetching);
        let fetched = match self.negotiator.fetch(trace.uri).await {
            Ok(fetched) => fetched,
            Err(error) => return Err(trace.fetch_error(error)),
        };
        self.check_domain(trace, &fetched.location)?;

        trace.advance(ResolutionStep::Validating);
        let validated = validate(fetched.document, kind)
            .and_then(|validated| {
                validated.check_origin(&fetched.location)?;
                Ok(validated)
            })
            .map_err(|error| trace.schema_error(error))?;
        self.check_domain(trace, &validated.id)?;

        Ok(validated)
    }
}
