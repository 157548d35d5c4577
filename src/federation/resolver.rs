//! Remote object resolver
//!
//! Public entry point turning a remote URI into exactly one local record:
//!
//! ```text
//! Unresolved -> Fetching -> Validating -> ResolvingActor -> Materializing -> Resolved
//! ```
//!
//! A stored record short-circuits to `Resolved` with no network access.
//! Any failure moves to `Failed` and leaves nothing written.

use std::sync::Arc;

use chrono::Utc;

use super::actor::ActorResolver;
use super::dedup::{DedupError, DedupStore};
use super::domain::DomainBlocklist;
use super::error::{FetchError, ResolutionStep, ResolveError, SchemaError};
use super::negotiator::ContentNegotiator;
use super::note::{ParsedPost, RemoteEmoji};
use super::steps::{Fetcher, Outcome, ResolutionTrace};
use super::validator::{ObjectKind, ValidatedDocument};
use crate::data::{Database, DatabaseError, Emoji, EntityId, Identity, Post};

/// Resolves remote posts and actors to local records
#[derive(Clone)]
pub struct Resolver {
    fetcher: Fetcher,
    dedup: DedupStore<Database>,
    actors: ActorResolver,
}

impl Resolver {
    /// Create a resolver
    ///
    /// # Arguments
    /// * `db` - Store holding the canonical records
    /// * `negotiator` - Outbound fetcher
    /// * `blocklist` - Domains never fetched from
    /// * `webfinger_canonicalize` - Look up canonical handles for new actors
    pub fn new(
        db: Arc<Database>,
        negotiator: Arc<ContentNegotiator>,
        blocklist: Arc<DomainBlocklist>,
        webfinger_canonicalize: bool,
    ) -> Self {
        let fetcher = Fetcher {
            negotiator,
            blocklist,
        };
        let dedup = DedupStore::new(db);
        let actors = ActorResolver::new(fetcher.clone(), dedup.clone(), webfinger_canonicalize);
        Self {
            fetcher,
            dedup,
            actors,
        }
    }

    pub fn actors(&self) -> &ActorResolver {
        &self.actors
    }

    fn db(&self) -> &Arc<Database> {
        self.dedup.store()
    }

    /// Resolve a post URI to its local record
    ///
    /// # Arguments
    /// * `uri` - Remote object URI
    /// * `allow_fetch` - Whether the network may be used on a local miss
    ///
    /// # Errors
    /// `NotFound` when `allow_fetch` is false and nothing is stored.
    /// Otherwise the first stage error, tagged with the failing step.
    pub async fn resolve(&self, uri: &str, allow_fetch: bool) -> Result<Post, ResolveError> {
        let mut trace = ResolutionTrace::new(ObjectKind::Post, uri);

        match self.dedup.find::<Post>(uri).await {
            Ok(Some(post)) => {
                trace.resolved(Outcome::Local);
                return Ok(post);
            }
            Ok(None) => {}
            Err(error) => return Err(trace.store_error(error)),
        }

        if !allow_fetch {
            return Err(trace.not_found());
        }

        let validated = self
            .fetcher
            .fetch_validated(&mut trace, ObjectKind::Post)
            .await?;

        // `uri` redirected or aliased to a document already stored
        if validated.id != uri {
            match self.dedup.find::<Post>(&validated.id).await {
                Ok(Some(post)) => {
                    trace.resolved(Outcome::Existing);
                    return Ok(post);
                }
                Ok(None) => {}
                Err(error) => return Err(trace.store_error(error)),
            }
        }

        trace.advance(ResolutionStep::ResolvingActor);
        let author = self.resolve_author(&mut trace, &validated).await?;

        trace.advance(ResolutionStep::Materializing);
        let parsed = ParsedPost::parse(&validated, &author);
        let emojis = parsed.emojis.clone();
        let now = Utc::now();
        let materialized = self
            .dedup
            .get_or_create(&validated.id, || parsed.clone().into_post(&author.id, now))
            .await;

        match materialized {
            Ok(materialized) => {
                let created = materialized.is_created();
                let post = materialized.into_record();
                if created {
                    self.import_emojis(&post.object_uri, emojis).await;
                }
                trace.resolved(if created {
                    Outcome::Created
                } else {
                    Outcome::Existing
                });
                Ok(post)
            }
            Err(error) => Err(dedup_failure(&mut trace, uri, error)),
        }
    }

    /// Resolve an actor URI to its identity, local-first
    pub async fn resolve_identity(
        &self,
        actor_uri: &str,
        allow_fetch: bool,
    ) -> Result<Identity, ResolveError> {
        self.actors.resolve_actor(actor_uri, allow_fetch).await
    }

    /// Resolve `user@domain` to an identity, local-first, through WebFinger
    pub async fn resolve_handle(
        &self,
        handle: &str,
        allow_fetch: bool,
    ) -> Result<Identity, ResolveError> {
        self.actors.resolve_handle(handle, allow_fetch).await
    }

    /// Re-fetch a post and update its record in place
    ///
    /// A `410 Gone` soft-deletes the record. Unknown URIs are resolved.
    pub async fn refresh(&self, uri: &str) -> Result<Post, ResolveError> {
        let mut trace = ResolutionTrace::new(ObjectKind::Post, uri);

        let existing = match self.db().get_post_by_object_uri(uri).await {
            Ok(Some(post)) => post,
            Ok(None) => return self.resolve(uri, true).await,
            Err(error) => return Err(trace.store_error(error)),
        };
        if existing.local {
            trace.resolved(Outcome::Local);
            return Ok(existing);
        }

        let validated = match self
            .fetcher
            .fetch_validated(&mut trace, ObjectKind::Post)
            .await
        {
            Ok(validated) => validated,
            Err(ResolveError::Fetch {
                source: FetchError::Gone,
                ..
            }) => return self.soft_delete_post(existing).await,
            Err(error) => return Err(error),
        };
        if validated.id != existing.object_uri {
            return Err(trace.schema_error(SchemaError::new(
                ObjectKind::Post,
                format!("object id changed to {}", validated.id),
            )));
        }

        trace.advance(ResolutionStep::ResolvingActor);
        let author = self.resolve_author(&mut trace, &validated).await?;

        trace.advance(ResolutionStep::Materializing);
        let mut post = existing;
        ParsedPost::parse(&validated, &author).apply_to(&mut post, &author.id, Utc::now());
        match self.db().update_post(&post).await {
            Ok(_) => {
                trace.resolved(Outcome::Refreshed);
                Ok(post)
            }
            Err(error) => Err(trace.store_error(error)),
        }
    }

    /// Re-fetch an actor and update its identity in place
    pub async fn refresh_actor(&self, actor_uri: &str) -> Result<Identity, ResolveError> {
        self.actors.refresh_actor(actor_uri).await
    }

    async fn resolve_author(
        &self,
        trace: &mut ResolutionTrace<'_>,
        validated: &ValidatedDocument,
    ) -> Result<Identity, ResolveError> {
        let Some(actor_uri) = validated.attributed_to.as_deref() else {
            return Err(trace.schema_error(SchemaError::new(
                ObjectKind::Post,
                "attributedTo is missing",
            )));
        };
        match self.actors.resolve_actor(actor_uri, true).await {
            Ok(author) => Ok(author),
            Err(source) => {
                let error = ResolveError::Actor {
                    uri: trace.uri().to_string(),
                    source: Box::new(source),
                };
                Err(trace.fail(error))
            }
        }
    }

    async fn soft_delete_post(&self, mut post: Post) -> Result<Post, ResolveError> {
        let now = Utc::now();
        self.db()
            .mark_post_deleted(&post.id, now)
            .await
            .map_err(|source| ResolveError::Store {
                uri: post.object_uri.clone(),
                step: ResolutionStep::Materializing,
                source,
            })?;
        tracing::info!(uri = %post.object_uri, "Remote post is gone, marked deleted");
        post.deleted_at = Some(now);
        post.updated_at = now;
        Ok(post)
    }

    /// Store custom emoji referenced by a new post
    ///
    /// Best effort: an emoji already known for the domain is skipped and
    /// other failures are logged.
    async fn import_emojis(&self, object_uri: &str, emojis: Vec<RemoteEmoji>) {
        let domain = super::ld::host_of(object_uri);
        for remote in emojis {
            let emoji = Emoji {
                id: EntityId::new().0,
                shortcode: remote.shortcode,
                domain: domain.clone(),
                local: false,
                image_url: remote.image_url,
                visible_in_picker: false,
                created_at: Utc::now(),
            };
            match self.db().insert_emoji(&emoji).await {
                Ok(()) => {}
                Err(DatabaseError::UniqueViolation(_)) => {}
                Err(error) => {
                    tracing::warn!(
                        uri = %object_uri,
                        shortcode = %emoji.shortcode,
                        error = %error,
                        "Failed to store remote emoji"
                    );
                }
            }
        }
    }
}

fn dedup_failure(trace: &mut ResolutionTrace<'_>, uri: &str, error: DedupError) -> ResolveError {
    match error {
        DedupError::Store(error) => trace.store_error(error),
        DedupError::ConflictRetryExhausted => {
            trace.fail(ResolveError::ConflictRetryExhausted(uri.to_string()))
        }
    }
}
