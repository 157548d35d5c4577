//! Custom emoji endpoint and cache refresh middleware
//!
//! - GET /api/v1/custom_emojis

use std::time::Instant;

use axum::{
    Router,
    extract::{Request, State},
    middleware::Next,
    response::{Json, Response},
    routing::get,
};
use serde_json::Value;

use super::attributes::{AttributeValue, DerivedSource, FieldSource, Projection};
use crate::AppState;
use crate::data::Emoji;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

/// Create emoji router
pub fn emoji_router() -> Router<AppState> {
    Router::new().route("/v1/custom_emojis", get(custom_emojis))
}

/// GET /api/v1/custom_emojis
///
/// Local emoji from the in-memory cache, in Mastodon's format.
async fn custom_emojis(State(state): State<AppState>) -> Json<Vec<Value>> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/api/v1/custom_emojis"])
        .start_timer();

    let emojis = state.emoji_cache.get().await;
    let body = emojis.iter().map(render_emoji).collect();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/custom_emojis", "200"])
        .inc();
    Json(body)
}

const EMOJI_PROJECTION: Projection =
    Projection::new(&["shortcode", "url", "static_url", "visible_in_picker"]);

const EMOJI_DERIVED: &[(&str, fn(&Emoji) -> AttributeValue)] = &[
    ("url", |emoji: &Emoji| emoji.image_url.clone().into()),
    ("static_url", |emoji: &Emoji| emoji.image_url.clone().into()),
];

fn render_emoji(emoji: &Emoji) -> Value {
    let derived = DerivedSource::new(emoji, EMOJI_DERIVED);
    let fields = FieldSource::new(emoji);
    EMOJI_PROJECTION.render(&[&derived, &fields])
}

/// Middleware reloading the emoji cache when its interval has elapsed
///
/// A failed reload keeps serving the previous snapshot.
pub async fn refresh_emoji_cache(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(error) = state.emoji_cache.refresh_if_due(Instant::now()).await {
        tracing::warn!(error = %error, "Emoji cache refresh failed");
    }
    next.run(request).await
}
