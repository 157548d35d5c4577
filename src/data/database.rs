//! SQLite database operations
//!
//! All database access goes through this module.
//! Every remote entity is keyed by a unique URI column; inserts report a
//! collision as [`DatabaseError::UniqueViolation`] so callers can fall back
//! to a lookup instead of failing.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::models::*;

/// Database layer error
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Driver or query failure
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Insert collided with an existing row on a unique key
    #[error("{0} already exists")]
    UniqueViolation(&'static str),

    /// Schema migration failure
    #[error("migration failed: {0}")]
    Migration(String),
}

impl DatabaseError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}

fn catch_unique_violation(entity: &'static str) -> impl Fn(sqlx::Error) -> DatabaseError {
    move |error| match error {
        sqlx::Error::Database(ref db_error) if db_error.is_unique_violation() => {
            DatabaseError::UniqueViolation(entity)
        }
        other => DatabaseError::Sqlx(other),
    }
}

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

const DEFAULT_MAX_CONNECTIONS: u32 = 8;

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, DatabaseError> {
        Self::connect_with_pool_size(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Connect with an explicit pool size.
    pub async fn connect_with_pool_size(
        path: &Path,
        max_connections: u32,
    ) -> Result<Self, DatabaseError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Sqlx(sqlx::Error::Io(e)))?;
        }

        // WAL lets readers proceed while a resolution inserts; the busy
        // timeout serializes concurrent writers instead of failing them.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                DatabaseError::Migration(e.to_string())
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Identities
    // =========================================================================

    /// Get identity by local ID
    pub async fn get_identity(&self, id: &str) -> Result<Option<Identity>, DatabaseError> {
        let identity = sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(identity)
    }

    /// Get identity by ActivityPub actor URI
    pub async fn get_identity_by_actor_uri(
        &self,
        actor_uri: &str,
    ) -> Result<Option<Identity>, DatabaseError> {
        let identity =
            sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE actor_uri = ?")
                .bind(actor_uri)
                .fetch_optional(&self.pool)
                .await?;

        Ok(identity)
    }

    /// Get a live identity by its canonical handle
    ///
    /// Remote handles are case-insensitive; the username is stored lowercased.
    pub async fn get_identity_by_handle(
        &self,
        username: &str,
        domain: &str,
    ) -> Result<Option<Identity>, DatabaseError> {
        let identity = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE username = ? AND domain = ? AND deleted_at IS NULL \
             ORDER BY local DESC, updated_at DESC LIMIT 1",
        )
        .bind(username.to_lowercase())
        .bind(domain.to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    /// Insert a new identity
    ///
    /// # Errors
    /// `UniqueViolation` if an identity with the same actor URI exists
    pub async fn insert_identity(&self, identity: &Identity) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO identities (
                id, actor_uri, local, username, domain, name, summary,
                profile_uri, inbox_uri, outbox_uri, shared_inbox_uri,
                followers_uri, following_uri, icon_uri, image_uri,
                manually_approves_followers, discoverable,
                public_key_id, public_key_pem, private_key_pem,
                fetched_at, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&identity.id)
        .bind(&identity.actor_uri)
        .bind(identity.local)
        .bind(&identity.username)
        .bind(&identity.domain)
        .bind(&identity.name)
        .bind(&identity.summary)
        .bind(&identity.profile_uri)
        .bind(&identity.inbox_uri)
        .bind(&identity.outbox_uri)
        .bind(&identity.shared_inbox_uri)
        .bind(&identity.followers_uri)
        .bind(&identity.following_uri)
        .bind(&identity.icon_uri)
        .bind(&identity.image_uri)
        .bind(identity.manually_approves_followers)
        .bind(identity.discoverable)
        .bind(&identity.public_key_id)
        .bind(&identity.public_key_pem)
        .bind(&identity.private_key_pem)
        .bind(identity.fetched_at)
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .bind(identity.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(catch_unique_violation("identity"))?;

        Ok(())
    }

    /// Update an identity in place by local ID
    ///
    /// The actor URI and creation time are never rewritten.
    ///
    /// # Returns
    /// `true` if updated, `false` if no matching row exists.
    pub async fn update_identity(&self, identity: &Identity) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE identities SET
                username = ?, domain = ?, name = ?, summary = ?,
                profile_uri = ?, inbox_uri = ?, outbox_uri = ?, shared_inbox_uri = ?,
                followers_uri = ?, following_uri = ?, icon_uri = ?, image_uri = ?,
                manually_approves_followers = ?, discoverable = ?,
                public_key_id = ?, public_key_pem = ?, private_key_pem = ?,
                fetched_at = ?, updated_at = ?, deleted_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&identity.username)
        .bind(&identity.domain)
        .bind(&identity.name)
        .bind(&identity.summary)
        .bind(&identity.profile_uri)
        .bind(&identity.inbox_uri)
        .bind(&identity.outbox_uri)
        .bind(&identity.shared_inbox_uri)
        .bind(&identity.followers_uri)
        .bind(&identity.following_uri)
        .bind(&identity.icon_uri)
        .bind(&identity.image_uri)
        .bind(identity.manually_approves_followers)
        .bind(identity.discoverable)
        .bind(&identity.public_key_id)
        .bind(&identity.public_key_pem)
        .bind(&identity.private_key_pem)
        .bind(identity.fetched_at)
        .bind(identity.updated_at)
        .bind(identity.deleted_at)
        .bind(&identity.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Soft-delete an identity
    pub async fn mark_identity_deleted(
        &self,
        id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("UPDATE identities SET deleted_at = ?, updated_at = ? WHERE id = ?")
                .bind(deleted_at)
                .bind(deleted_at)
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Posts
    // =========================================================================

    /// Get post by local ID
    pub async fn get_post(&self, id: &str) -> Result<Option<Post>, DatabaseError> {
        let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(post)
    }

    /// Get post by ActivityPub object URI
    pub async fn get_post_by_object_uri(
        &self,
        object_uri: &str,
    ) -> Result<Option<Post>, DatabaseError> {
        let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE object_uri = ?")
            .bind(object_uri)
            .fetch_optional(&self.pool)
            .await?;

        Ok(post)
    }

    /// Insert a new post with all of its content in one statement
    ///
    /// # Errors
    /// `UniqueViolation` if a post with the same object URI exists
    pub async fn insert_post(&self, post: &Post) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO posts (
                id, object_uri, author_id, local, object_type, url, content,
                summary, sensitive, visibility, in_reply_to,
                hashtags, mentions, attachments,
                published_at, edited_at, fetched_at, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.object_uri)
        .bind(&post.author_id)
        .bind(post.local)
        .bind(&post.object_type)
        .bind(&post.url)
        .bind(&post.content)
        .bind(&post.summary)
        .bind(post.sensitive)
        .bind(&post.visibility)
        .bind(&post.in_reply_to)
        .bind(&post.hashtags)
        .bind(&post.mentions)
        .bind(&post.attachments)
        .bind(post.published_at)
        .bind(post.edited_at)
        .bind(post.fetched_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(post.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(catch_unique_violation("post"))?;

        Ok(())
    }

    /// Update a post in place by local ID
    ///
    /// # Returns
    /// `true` if updated, `false` if no matching row exists.
    pub async fn update_post(&self, post: &Post) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET
                author_id = ?, object_type = ?, url = ?, content = ?, summary = ?,
                sensitive = ?, visibility = ?, in_reply_to = ?,
                hashtags = ?, mentions = ?, attachments = ?,
                published_at = ?, edited_at = ?, fetched_at = ?, updated_at = ?, deleted_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&post.author_id)
        .bind(&post.object_type)
        .bind(&post.url)
        .bind(&post.content)
        .bind(&post.summary)
        .bind(post.sensitive)
        .bind(&post.visibility)
        .bind(&post.in_reply_to)
        .bind(&post.hashtags)
        .bind(&post.mentions)
        .bind(&post.attachments)
        .bind(post.published_at)
        .bind(post.edited_at)
        .bind(post.fetched_at)
        .bind(post.updated_at)
        .bind(post.deleted_at)
        .bind(&post.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Soft-delete a post
    pub async fn mark_post_deleted(
        &self,
        id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE posts SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(deleted_at)
            .bind(deleted_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Count posts stored for an object URI (0 or 1)
    pub async fn count_posts_by_object_uri(&self, object_uri: &str) -> Result<i64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE object_uri = ?")
            .bind(object_uri)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Count identities stored for an actor URI (0 or 1)
    pub async fn count_identities_by_actor_uri(
        &self,
        actor_uri: &str,
    ) -> Result<i64, DatabaseError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM identities WHERE actor_uri = ?")
                .bind(actor_uri)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    // =========================================================================
    // Emoji
    // =========================================================================

    /// Get all local emoji usable in the picker, ordered by shortcode
    pub async fn list_local_emojis(&self) -> Result<Vec<Emoji>, DatabaseError> {
        let emojis = sqlx::query_as::<_, Emoji>(
            "SELECT * FROM emojis WHERE local = 1 AND visible_in_picker = 1 ORDER BY shortcode",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(emojis)
    }

    /// Insert an emoji
    ///
    /// # Errors
    /// `UniqueViolation` if the shortcode is taken for this domain
    pub async fn insert_emoji(&self, emoji: &Emoji) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO emojis (id, shortcode, domain, local, image_url, visible_in_picker, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&emoji.id)
        .bind(&emoji.shortcode)
        .bind(&emoji.domain)
        .bind(emoji.local)
        .bind(&emoji.image_url)
        .bind(emoji.visible_in_picker)
        .bind(emoji.created_at)
        .execute(&self.pool)
        .await
        .map_err(catch_unique_violation("emoji"))?;

        Ok(())
    }
}
