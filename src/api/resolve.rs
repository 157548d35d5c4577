//! Resolver endpoints
//!
//! - GET  /api/v1/resolve/post?uri=...&fetch=... - Resolve a post
//! - POST /api/v1/resolve/post {"uri": ...} - Refresh a post
//! - GET  /api/v1/resolve/actor?uri=...&fetch=... - Resolve an actor URI or handle
//! - POST /api/v1/resolve/actor {"uri": ...} - Refresh an actor

use axum::{
    Router,
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::attributes::{AttributeValue, DerivedSource, FieldSource, Projection};
use super::dispatch::{DispatchError, Methods};
use crate::AppState;
use crate::data::{Identity, Post};
use crate::error::AppError;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

const POST_ENDPOINT: &str = "/api/v1/resolve/post";
const ACTOR_ENDPOINT: &str = "/api/v1/resolve/actor";

/// Create resolver router
///
/// # Errors
/// Only if a dispatch table is declared with a bad verb
pub fn resolve_router() -> Result<Router<AppState>, DispatchError> {
    let post = Methods::new()
        .on("get", resolve_post)?
        .on("post", refresh_post)?;
    let actor = Methods::new()
        .on("get", resolve_actor)?
        .on("post", refresh_actor)?;

    Ok(Router::new()
        .route("/v1/resolve/post", post.into_route())
        .route("/v1/resolve/actor", actor.into_route()))
}

/// Query for resolve lookups
#[derive(Debug, Deserialize)]
struct ResolveQuery {
    uri: String,
    /// Allow network access on a local miss
    #[serde(default = "default_fetch")]
    fetch: bool,
}

fn default_fetch() -> bool {
    true
}

/// Body for refresh requests
#[derive(Debug, Deserialize)]
struct RefreshRequest {
    uri: String,
}

fn require_uri(uri: &str) -> Result<&str, AppError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(AppError::Validation("uri is required".to_string()));
    }
    Ok(uri)
}

/// GET /api/v1/resolve/post
async fn resolve_post(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<Value>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", POST_ENDPOINT])
        .start_timer();

    let uri = require_uri(&query.uri)?;
    let post = state.resolver.resolve(uri, query.fetch).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", POST_ENDPOINT, "200"])
        .inc();
    Ok(Json(render_post(&post)))
}

/// POST /api/v1/resolve/post
async fn refresh_post(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<Value>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", POST_ENDPOINT])
        .start_timer();

    let uri = require_uri(&request.uri)?;
    let post = state.resolver.refresh(uri).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", POST_ENDPOINT, "200"])
        .inc();
    Ok(Json(render_post(&post)))
}

/// GET /api/v1/resolve/actor
///
/// `uri` is an actor URI, or a `user@domain` handle.
async fn resolve_actor(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<Value>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", ACTOR_ENDPOINT])
        .start_timer();

    let uri = require_uri(&query.uri)?;
    let identity = if uri.starts_with("http://") || uri.starts_with("https://") {
        state.resolver.resolve_identity(uri, query.fetch).await?
    } else {
        state.resolver.resolve_handle(uri, query.fetch).await?
    };

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", ACTOR_ENDPOINT, "200"])
        .inc();
    Ok(Json(render_identity(&identity)))
}

/// POST /api/v1/resolve/actor
async fn refresh_actor(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<Value>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", ACTOR_ENDPOINT])
        .start_timer();

    let uri = require_uri(&request.uri)?;
    let identity = state.resolver.refresh_actor(uri).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", ACTOR_ENDPOINT, "200"])
        .inc();
    Ok(Json(render_identity(&identity)))
}

// =============================================================================
// Projections
// =============================================================================

const POST_PROJECTION: Projection = Projection::new(&[
    "id",
    "uri",
    "url",
    "account_id",
    "type",
    "content",
    "spoiler_text",
    "sensitive",
    "visibility",
    "in_reply_to",
    "tags",
    "mentions",
    "media_attachments",
    "created_at",
    "edited_at",
    "deleted",
]);

const POST_DERIVED: &[(&str, fn(&Post) -> AttributeValue)] = &[
    ("uri", |post: &Post| post.object_uri.clone().into()),
    ("account_id", |post: &Post| post.author_id.clone().into()),
    ("type", |post: &Post| post.object_type.clone().into()),
    ("spoiler_text", |post: &Post| {
        post.summary.clone().unwrap_or_default().into()
    }),
    ("tags", |post: &Post| {
        AttributeValue::collection(
            post.hashtags
                .0
                .clone()
                .into_iter()
                .map(|name| AttributeValue::from(json!({ "name": name }))),
        )
    }),
    ("mentions", |post: &Post| {
        AttributeValue::collection(post.mentions.0.clone().into_iter().map(AttributeValue::from))
    }),
    ("media_attachments", |post: &Post| {
        AttributeValue::collection(
            post.attachments
                .0
                .clone()
                .into_iter()
                .map(|attachment| {
                    AttributeValue::from(serde_json::to_value(attachment).unwrap_or(Value::Null))
                }),
        )
    }),
    ("created_at", |post: &Post| {
        json!(post.published_at.unwrap_or(post.created_at)).into()
    }),
    ("deleted", |post: &Post| post.is_deleted().into()),
];

fn render_post(post: &Post) -> Value {
    let derived = DerivedSource::new(post, POST_DERIVED);
    let fields = FieldSource::new(post);
    POST_PROJECTION.render(&[&derived, &fields])
}

const IDENTITY_PROJECTION: Projection = Projection::new(&[
    "id",
    "uri",
    "acct",
    "username",
    "domain",
    "display_name",
    "note",
    "url",
    "avatar",
    "header",
    "locked",
    "discoverable",
    "inbox",
    "shared_inbox",
    "public_key_id",
    "local",
    "fetched_at",
    "deleted",
]);

const IDENTITY_DERIVED: &[(&str, fn(&Identity) -> AttributeValue)] = &[
    ("uri", |identity: &Identity| identity.actor_uri.clone().into()),
    ("acct", |identity: &Identity| identity.handle().into()),
    ("display_name", |identity: &Identity| {
        identity
            .name
            .clone()
            .or_else(|| identity.username.clone())
            .into()
    }),
    ("note", |identity: &Identity| {
        identity.summary.clone().unwrap_or_default().into()
    }),
    ("url", |identity: &Identity| {
        identity
            .profile_uri
            .clone()
            .unwrap_or_else(|| identity.actor_uri.clone())
            .into()
    }),
    ("avatar", |identity: &Identity| identity.icon_uri.clone().into()),
    ("header", |identity: &Identity| identity.image_uri.clone().into()),
    ("locked", |identity: &Identity| {
        identity.manually_approves_followers.into()
    }),
    ("inbox", |identity: &Identity| identity.inbox_uri.clone().into()),
    ("shared_inbox", |identity: &Identity| {
        identity.shared_inbox_uri.clone().into()
    }),
    ("deleted", |identity: &Identity| identity.is_deleted().into()),
];

fn render_identity(identity: &Identity) -> Value {
    let derived = DerivedSource::new(identity, IDENTITY_DERIVED);
    let fields = FieldSource::new(identity);
    IDENTITY_PROJECTION.render(&[&derived, &fields])
}
