//! API layer
//!
//! HTTP handlers for:
//! - Resolver API (resolve and refresh posts and actors)
//! - Custom emoji
//! - ActivityPub (system actor) and WebFinger
//! - Metrics (Prometheus)

pub mod attributes;
pub mod dispatch;
mod activitypub;
mod emoji;
mod metrics;
mod resolve;
mod wellknown;

pub use activitypub::activitypub_router;
pub use dispatch::{DispatchError, Methods, Verb};
pub use emoji::{emoji_router, refresh_emoji_cache};
pub use metrics::metrics_router;
pub use resolve::resolve_router;
pub use wellknown::wellknown_router;
