//! Well-known endpoints
//!
//! - /.well-known/webfinger

use axum::{
    Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{SYSTEM_USERNAME, parse_handle};

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
pub fn wellknown_router() -> Router<AppState> {
    Router::new().route("/.well-known/webfinger", get(webfinger))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// GET /.well-known/webfinger
///
/// Answers for the system actor, by `acct:__system__@{domain}` or by its
/// actor URI.
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<impl IntoResponse, AppError> {
    let resource = query.resource.trim();
    let actor = &state.system_actor;

    let matches = if resource == actor.actor_uri() {
        true
    } else {
        if !resource.starts_with("acct:") {
            return Err(AppError::Validation(
                "Resource must start with 'acct:'".to_string(),
            ));
        }
        let (username, domain) = parse_handle(resource)
            .ok_or_else(|| AppError::Validation("Invalid acct format".to_string()))?;
        username == SYSTEM_USERNAME
            && domain.eq_ignore_ascii_case(&state.config.server.domain)
    };

    if !matches {
        return Err(AppError::NotFound);
    }

    Ok((
        [(header::CONTENT_TYPE, "application/jrd+json")],
        Json(actor.to_webfinger()),
    ))
}
