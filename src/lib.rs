//! Farfetch - remote ActivityPub object resolver
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Resolver endpoints (verb dispatch tables)                │
//! │  - Custom emoji, system actor, WebFinger, metrics           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - Content negotiation, validation                          │
//! │  - Actor resolution, dedup store, orchestrator              │
//! │  - HTTP Signatures                                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx), unique index per remote URI               │
//! │  - Local emoji cache                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `federation`: Remote object resolution and signatures
//! - `data`: Database and cache layer
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus metrics

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Cloned for each request; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Remote object resolver
    pub resolver: federation::Resolver,

    /// Inbound signature verification
    pub verifier: federation::ActorKeyVerifier,

    /// Local emoji (volatile, refreshed on an interval)
    pub emoji_cache: Arc<data::EmojiCache>,

    /// Local actor that signs outbound fetches
    pub system_actor: Arc<federation::SystemActor>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Load or create the system actor
    /// 3. Build the content negotiator (signing with the system actor)
    /// 4. Build the resolver
    /// 5. Load the emoji cache
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let client = federation::ContentNegotiator::client_builder(&config.federation)
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;
        Self::with_http_client(config, client).await
    }

    /// Initialize application state around an existing HTTP client
    ///
    /// The client should be built from
    /// [`federation::ContentNegotiator::client_builder`].
    pub async fn with_http_client(
        config: config::AppConfig,
        client: reqwest::Client,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(
            data::Database::connect_with_pool_size(
                &config.database.path,
                config.database.max_connections,
            )
            .await?,
        );
        tracing::info!(path = %config.database.path.display(), "Database connected");

        // 2. System actor
        let system_actor = Arc::new(federation::SystemActor::ensure(&db, &config).await?);
        system_actor.check_key()?;
        tracing::info!(actor = %system_actor.actor_uri(), "System actor ready");

        // 3. Content negotiator
        let signer = config
            .federation
            .signed_fetch
            .then(|| system_actor.signer());
        let negotiator = Arc::new(federation::ContentNegotiator::with_client(
            &config.federation,
            signer,
            client,
        ));

        // 4. Resolver
        let blocklist = negotiator.blocklist().clone();
        if !blocklist.is_empty() {
            tracing::info!(
                domains = config.federation.blocked_domains.len(),
                "Domain blocklist loaded"
            );
        }
        let resolver = federation::Resolver::new(
            db.clone(),
            negotiator,
            blocklist,
            config.federation.webfinger_canonicalize,
        );
        let verifier = federation::ActorKeyVerifier::new(resolver.clone());

        // 5. Emoji cache
        let emoji_cache = Arc::new(data::EmojiCache::new(
            db.clone(),
            config.emoji.refresh_interval(),
        ));
        emoji_cache.refresh(std::time::Instant::now()).await?;

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            resolver,
            verifier,
            emoji_cache,
            system_actor,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
///
/// # Errors
/// Returns error if a dispatch table is declared with an unknown verb
pub fn build_router(state: AppState) -> Result<axum::Router, error::AppError> {
    use axum::{Router, middleware};
    use tower_http::trace::TraceLayer;

    let cors_layer = build_cors_layer(&state.config.server);
    let resolve = api::resolve_router().map_err(|e| error::AppError::Config(e.to_string()))?;

    Ok(Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .nest("/api", resolve.merge(api::emoji_router()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::refresh_emoji_cache,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router()))
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
