//! ActivityPub endpoints
//!
//! - System actor document

use axum::{
    Router,
    extract::State,
    http::header,
    response::{IntoResponse, Json},
    routing::get,
};

use crate::AppState;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

/// Create ActivityPub router
///
/// Routes:
/// - GET /actor/ - System actor
pub fn activitypub_router() -> Router<AppState> {
    Router::new().route("/actor/", get(system_actor))
}

/// GET /actor/
///
/// Returns the system actor document with its public key, so remote
/// servers can verify our signed fetches.
///
/// Content-Type: application/activity+json
async fn system_actor(State(state): State<AppState>) -> impl IntoResponse {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/actor/"])
        .start_timer();

    let document = state.system_actor.to_ap();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/actor/", "200"])
        .inc();

    (
        [(header::CONTENT_TYPE, "application/activity+json")],
        Json(document),
    )
}
