//! Verb dispatch tables
//!
//! A route is declared as a table from HTTP verbs to handlers. Verbs are a
//! closed set checked when the table is built; a request with a verb the
//! table does not list gets `405 Method Not Allowed` with an `Allow`
//! header naming the verbs it does list.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use axum::{
    Json,
    handler::Handler,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{MethodFilter, MethodRouter},
};
use thiserror::Error;

/// HTTP verbs a table may dispatch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    fn filter(&self) -> MethodFilter {
        match self {
            Self::Get => MethodFilter::GET,
            Self::Post => MethodFilter::POST,
            Self::Put => MethodFilter::PUT,
            Self::Patch => MethodFilter::PATCH,
            Self::Delete => MethodFilter::DELETE,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "post" => Ok(Self::Post),
            "put" => Ok(Self::Put),
            "patch" => Ok(Self::Patch),
            "delete" => Ok(Self::Delete),
            _ => Err(DispatchError::UnknownVerb(s.to_string())),
        }
    }
}

/// Rejected dispatch table declaration
#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    #[error("verb {0} is declared twice")]
    DuplicateVerb(Verb),
}

/// Verb to handler table for one route
pub struct Methods<S> {
    router: MethodRouter<S>,
    verbs: BTreeSet<Verb>,
}

impl<S> Methods<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            router: MethodRouter::new(),
            verbs: BTreeSet::new(),
        }
    }

    /// Dispatch `verb` (case-insensitive) to `handler`
    ///
    /// # Errors
    /// `UnknownVerb` for anything outside [`Verb`], `DuplicateVerb` if the
    /// verb already has a handler.
    pub fn on<H, T>(mut self, verb: &str, handler: H) -> Result<Self, DispatchError>
    where
        H: Handler<T, S>,
        T: 'static,
    {
        let verb: Verb = verb.parse()?;
        if !self.verbs.insert(verb) {
            return Err(DispatchError::DuplicateVerb(verb));
        }
        self.router = self.router.on(verb.filter(), handler);
        Ok(self)
    }

    /// `Allow` header value, e.g. `GET, POST`
    pub fn allow_header(&self) -> String {
        self.verbs
            .iter()
            .map(Verb::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Finish the table as a route
    pub fn into_route(self) -> MethodRouter<S> {
        let allow = self.allow_header();
        self.router.fallback(move || {
            let allow = allow.clone();
            async move {
                (
                    StatusCode::METHOD_NOT_ALLOWED,
                    [(header::ALLOW, allow)],
                    Json(serde_json::json!({ "error": "Method not allowed" })),
                )
                    .into_response()
            }
        })
    }
}

impl<S> Default for Methods<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
