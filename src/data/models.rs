//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Identity
// =============================================================================

/// A local or remote ActivityPub actor
///
/// Remote identities are materialized from their actor document and keyed
/// by `actor_uri`. The only local identity is the system actor.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Identity {
    pub id: String,
    /// ActivityPub actor URI (globally unique)
    pub actor_uri: String,
    pub local: bool,
    /// Lowercased preferredUsername
    pub username: Option<String>,
    /// Canonical domain (from WebFinger, or the actor host)
    pub domain: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub profile_uri: Option<String>,
    pub inbox_uri: Option<String>,
    pub outbox_uri: Option<String>,
    pub shared_inbox_uri: Option<String>,
    pub followers_uri: Option<String>,
    pub following_uri: Option<String>,
    pub icon_uri: Option<String>,
    pub image_uri: Option<String>,
    pub manually_approves_followers: bool,
    pub discoverable: bool,
    /// Key ID advertised by the actor (actor#main-key)
    pub public_key_id: Option<String>,
    /// RSA public key (PEM format)
    pub public_key_pem: Option<String>,
    /// RSA private key (PEM format), local identities only
    #[serde(skip_serializing)]
    pub private_key_pem: Option<String>,
    /// When the actor document was last fetched
    pub fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// `username@domain`, or a placeholder when the actor has not told us
    pub fn handle(&self) -> String {
        match (&self.username, &self.domain) {
            (None, _) => "(unknown user)".to_string(),
            (Some(username), Some(domain)) => format!("{}@{}", username, domain),
            (Some(username), None) => format!("{}@(unknown server)", username),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// =============================================================================
// Post
// =============================================================================

/// A materialized remote post
///
/// Exactly one row exists per `object_uri`. The author is a non-owning
/// reference to an [`Identity`] row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: String,
    /// ActivityPub object URI (globally unique)
    pub object_uri: String,
    /// Local ID of the authoring identity
    pub author_id: String,
    pub local: bool,
    /// ActivityStreams type (Note, Article, Question, ...)
    pub object_type: String,
    /// Human-facing URL, defaults to the object URI
    pub url: String,
    /// Sanitized HTML content
    pub content: String,
    /// Content warning text
    pub summary: Option<String>,
    pub sensitive: bool,
    /// Visibility: public, unlisted, followers, mentioned
    pub visibility: String,
    /// URI of the post this replies to
    pub in_reply_to: Option<String>,
    pub hashtags: Json<Vec<String>>,
    /// Actor URIs of mentioned identities (never fetched)
    pub mentions: Json<Vec<String>>,
    pub attachments: Json<Vec<PostAttachment>>,
    pub published_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Media attached to a remote post
///
/// Attachments have no IDs of their own and are replaced wholesale
/// whenever the post is re-fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAttachment {
    pub url: String,
    /// MIME type (e.g., "image/webp")
    pub media_type: String,
    /// Alt text description
    pub name: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Blurhash for placeholder
    pub blurhash: Option<String>,
    pub focal_x: Option<f64>,
    pub focal_y: Option<f64>,
}

/// Post visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Unlisted,
    Followers,
    Mentioned,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Followers => "followers",
            Self::Mentioned => "mentioned",
        }
    }
}

// =============================================================================
// Emoji
// =============================================================================

/// Custom emoji
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Emoji {
    pub id: String,
    pub shortcode: String,
    /// Owning domain, None for local emoji
    pub domain: Option<String>,
    pub local: bool,
    pub image_url: String,
    pub visible_in_picker: bool,
    pub created_at: DateTime<Utc>,
}
