//! Identity resolution
//!
//! Resolves actor URIs to local [`Identity`] rows, local-first. Identity
//! attributes come only from the actor document itself (plus an optional
//! WebFinger lookup for the canonical handle); posts are never followed,
//! so actor resolution cannot recurse back into post resolution.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::dedup::{DedupError, DedupStore};
use super::error::{FetchError, ResolutionStep, ResolveError, SchemaError};
use super::ld;
use super::steps::{Fetcher, Outcome, ResolutionTrace};
use super::validator::{ObjectKind, ValidatedDocument};
use super::webfinger::{parse_handle, resolve_webfinger, webfinger_url};
use crate::data::{Database, EntityId, Identity};

/// Actor fields imported from an actor document
#[derive(Debug, Clone)]
pub struct ParsedActor {
    pub id: String,
    pub actor_type: String,
    /// Lowercased preferredUsername
    pub username: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub profile_uri: Option<String>,
    pub inbox: Option<String>,
    pub outbox: Option<String>,
    pub shared_inbox: Option<String>,
    pub followers: Option<String>,
    pub following: Option<String>,
    pub icon: Option<String>,
    pub image: Option<String>,
    pub manually_approves_followers: bool,
    pub discoverable: bool,
    pub public_key_id: Option<String>,
    pub public_key_pem: Option<String>,
}

impl ParsedActor {
    /// Extract actor data
    ///
    /// # Arguments
    /// * `validated` - Actor document that passed validation
    pub fn parse(validated: &ValidatedDocument) -> Self {
        let document = &validated.document;
        let public_key = document.get("publicKey");

        Self {
            id: validated.id.clone(),
            actor_type: validated.object_type.clone(),
            username: ld::get_str(document, "preferredUsername")
                .map(|username| username.to_lowercase())
                .filter(|username| !username.is_empty()),
            name: ld::get_str(document, "name").filter(|name| !name.is_empty()),
            summary: ld::get_str(document, "summary").map(|summary| ammonia::clean(&summary)),
            profile_uri: document.get("url").and_then(ld::link_href),
            inbox: document.get("inbox").and_then(ld::object_to_id),
            outbox: document.get("outbox").and_then(ld::object_to_id),
            shared_inbox: document
                .get("endpoints")
                .and_then(|endpoints| endpoints.get("sharedInbox"))
                .and_then(ld::object_to_id),
            followers: document.get("followers").and_then(ld::object_to_id),
            following: document.get("following").and_then(ld::object_to_id),
            icon: document.get("icon").and_then(ld::link_href),
            image: document.get("image").and_then(ld::link_href),
            manually_approves_followers: ld::get_bool(document, "manuallyApprovesFollowers")
                .unwrap_or(false),
            discoverable: ld::get_bool(document, "discoverable")
                .or_else(|| ld::get_bool(document, "toot:discoverable"))
                .unwrap_or(true),
            public_key_id: public_key
                .and_then(|key| key.get("id"))
                .and_then(Value::as_str)
                .map(str::to_owned),
            public_key_pem: public_key
                .and_then(|key| key.get("publicKeyPem"))
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }

    /// Build a new remote identity
    pub fn into_identity(self, handle: CanonicalHandle, now: DateTime<Utc>) -> Identity {
        let mut identity = Identity {
            id: EntityId::new().0,
            actor_uri: self.id.clone(),
            local: false,
            username: None,
            domain: None,
            name: None,
            summary: None,
            profile_uri: None,
            inbox_uri: None,
            outbox_uri: None,
            shared_inbox_uri: None,
            followers_uri: None,
            following_uri: None,
            icon_uri: None,
            image_uri: None,
            manually_approves_followers: false,
            discoverable: true,
            public_key_id: None,
            public_key_pem: None,
            private_key_pem: None,
            fetched_at: Some(now),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.apply_to(&mut identity, handle, now);
        identity
    }

    /// Overwrite an identity's imported fields, keeping its local ID
    pub fn apply_to(self, identity: &mut Identity, handle: CanonicalHandle, now: DateTime<Utc>) {
        identity.username = handle.username.or(self.username);
        identity.domain = handle.domain;
        identity.name = self.name;
        identity.summary = self.summary;
        identity.profile_uri = self.profile_uri;
        identity.inbox_uri = self.inbox;
        identity.outbox_uri = self.outbox;
        identity.shared_inbox_uri = self.shared_inbox;
        identity.followers_uri = self.followers;
        identity.following_uri = self.following;
        identity.icon_uri = self.icon;
        identity.image_uri = self.image;
        identity.manually_approves_followers = self.manually_approves_followers;
        identity.discoverable = self.discoverable;
        identity.public_key_id = self.public_key_id;
        identity.public_key_pem = self.public_key_pem;
        identity.fetched_at = Some(now);
        identity.updated_at = now;
        identity.deleted_at = None;
    }
}

/// Username and domain an identity is known by
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalHandle {
    /// Overrides preferredUsername when WebFinger reports one
    pub username: Option<String>,
    pub domain: Option<String>,
}

/// Resolves actor URIs to identities
#[derive(Clone)]
pub struct ActorResolver {
    fetcher: Fetcher,
    dedup: DedupStore<Database>,
    webfinger_canonicalize: bool,
}

impl ActorResolver {
    pub fn new(
        fetcher: Fetcher,
        dedup: DedupStore<Database>,
        webfinger_canonicalize: bool,
    ) -> Self {
        Self {
            fetcher,
            dedup,
            webfinger_canonicalize,
        }
    }

    /// Resolve an actor URI to its identity
    ///
    /// A stored identity is returned without network access. Otherwise the
    /// actor document is fetched, validated and materialized, importing its
    /// public key.
    ///
    /// # Errors
    /// `NotFound` when `allow_fetch` is false and nothing is stored;
    /// otherwise any stage error with the failing step attached.
    pub async fn resolve_actor(
        &self,
        actor_uri: &str,
        allow_fetch: bool,
    ) -> Result<Identity, ResolveError> {
        let mut trace = ResolutionTrace::new(ObjectKind::Actor, actor_uri);

        match self.dedup.find::<Identity>(actor_uri).await {
            Ok(Some(identity)) => {
                trace.resolved(Outcome::Local);
                return Ok(identity);
            }
            Ok(None) => {}
            Err(error) => return Err(trace.store_error(error)),
        }

        if !allow_fetch {
            return Err(trace.not_found());
        }

        let validated = self
            .fetcher
            .fetch_validated(&mut trace, ObjectKind::Actor)
            .await?;
        if validated.id != actor_uri {
            match self.dedup.find::<Identity>(&validated.id).await {
                Ok(Some(identity)) => {
                    trace.resolved(Outcome::Existing);
                    return Ok(identity);
                }
                Ok(None) => {}
                Err(error) => return Err(trace.store_error(error)),
            }
        }
        let parsed = ParsedActor::parse(&validated);

        trace.advance(ResolutionStep::Materializing);
        let handle = self.canonical_handle(&parsed).await;
        let now = Utc::now();
        let materialized = self
            .dedup
            .get_or_create(&parsed.id, || parsed.clone().into_identity(handle.clone(), now))
            .await;

        match materialized {
            Ok(materialized) => {
                trace.resolved(if materialized.is_created() {
                    Outcome::Created
                } else {
                    Outcome::Existing
                });
                Ok(materialized.into_record())
            }
            Err(DedupError::Store(error)) => Err(trace.store_error(error)),
            Err(DedupError::ConflictRetryExhausted) => Err(
                trace.fail(ResolveError::ConflictRetryExhausted(actor_uri.to_string())),
            ),
        }
    }

    /// Re-fetch a stored actor and update it in place
    ///
    /// A `410 Gone` soft-deletes the identity. Unknown actors are resolved.
    pub async fn refresh_actor(&self, actor_uri: &str) -> Result<Identity, ResolveError> {
        let db = self.dedup.store().clone();
        let mut trace = ResolutionTrace::new(ObjectKind::Actor, actor_uri);

        let existing = match db.get_identity_by_actor_uri(actor_uri).await {
            Ok(Some(identity)) => identity,
            Ok(None) => return self.resolve_actor(actor_uri, true).await,
            Err(error) => return Err(trace.store_error(error)),
        };
        if existing.local {
            trace.resolved(Outcome::Local);
            return Ok(existing);
        }

        let validated = match self
            .fetcher
            .fetch_validated(&mut trace, ObjectKind::Actor)
            .await
        {
            Ok(validated) => validated,
            Err(ResolveError::Fetch {
                source: FetchError::Gone,
                ..
            }) => return soft_delete_identity(&db, existing).await,
            Err(error) => return Err(error),
        };
        if validated.id != existing.actor_uri {
            return Err(trace.schema_error(SchemaError::new(
                ObjectKind::Actor,
                format!("actor id changed to {}", validated.id),
            )));
        }

        trace.advance(ResolutionStep::Materializing);
        let parsed = ParsedActor::parse(&validated);
        let handle = self.canonical_handle(&parsed).await;
        let mut identity = existing;
        parsed.apply_to(&mut identity, handle, Utc::now());
        match db.update_identity(&identity).await {
            Ok(_) => {
                trace.resolved(Outcome::Refreshed);
                Ok(identity)
            }
            Err(error) => Err(trace.store_error(error)),
        }
    }

    /// Resolve `user@domain` to an identity
    ///
    /// A stored identity with that canonical handle is returned without
    /// network access. Otherwise WebFinger at `https://{domain}` yields the
    /// actor URI, which is resolved like any other.
    pub async fn resolve_handle(
        &self,
        handle: &str,
        allow_fetch: bool,
    ) -> Result<Identity, ResolveError> {
        let Some((username, domain)) = parse_handle(handle) else {
            return Err(ResolveError::Schema {
                uri: handle.to_string(),
                step: ResolutionStep::Unresolved,
                source: SchemaError::new(ObjectKind::Actor, "handle must be user@domain"),
            });
        };

        let base_url = format!("https://{}", domain);
        let lookup_url = webfinger_url(&base_url, &username, &domain);
        let mut trace = ResolutionTrace::new(ObjectKind::Actor, &lookup_url);

        match self.dedup.store().get_identity_by_handle(&username, &domain).await {
            Ok(Some(identity)) => {
                trace.resolved(Outcome::Local);
                return Ok(identity);
            }
            Ok(None) => {}
            Err(error) => return Err(trace.store_error(error)),
        }
        if !allow_fetch {
            return Err(trace.not_found());
        }
        self.fetcher.check_blocked(&mut trace)?;

        trace.advance(ResolutionStep::Fetching);
        let result =
            match resolve_webfinger(&base_url, &username, &domain, &self.fetcher.negotiator).await {
                Ok(result) => result,
                Err(error) => return Err(trace.fetch_error(error)),
            };
        tracing::debug!(
            handle = %handle,
            actor = %result.actor_uri,
            "Handle resolved via WebFinger"
        );

        self.resolve_actor(&result.actor_uri, true).await
    }

    /// Canonical username and domain for a fetched actor
    ///
    /// Asks WebFinger at the actor's own server for
    /// `acct:{preferredUsername}@{actor host}`. The answer is used only if
    /// it points back at this actor; any failure falls back to the actor
    /// host.
    async fn canonical_handle(&self, parsed: &ParsedActor) -> CanonicalHandle {
        let fallback = CanonicalHandle {
            username: None,
            domain: ld::host_of(&parsed.id),
        };
        let (Some(username), Some(host), true) = (
            parsed.username.as_deref(),
            fallback.domain.as_deref(),
            self.webfinger_canonicalize,
        ) else {
            return fallback;
        };
        let Ok(actor_url) = url::Url::parse(&parsed.id) else {
            return fallback;
        };
        let base_url = actor_url.origin().ascii_serialization();

        match resolve_webfinger(&base_url, username, host, &self.fetcher.negotiator).await {
            Ok(result) if result.actor_uri == parsed.id => match result.username_and_domain() {
                Some((username, domain)) => CanonicalHandle {
                    username: Some(username),
                    domain: Some(domain),
                },
                None => fallback,
            },
            Ok(result) => {
                tracing::info!(
                    actor = %parsed.id,
                    webfinger_actor = %result.actor_uri,
                    "WebFinger points at a different actor, using actor host"
                );
                fallback
            }
            Err(error) => {
                tracing::debug!(actor = %parsed.id, error = %error, "WebFinger lookup failed");
                fallback
            }
        }
    }
}

async fn soft_delete_identity(
    db: &Database,
    mut identity: Identity,
) -> Result<Identity, ResolveError> {
    let now = Utc::now();
    db.mark_identity_deleted(&identity.id, now)
        .await
        .map_err(|source| ResolveError::Store {
            uri: identity.actor_uri.clone(),
            step: ResolutionStep::Materializing,
            source,
        })?;
    tracing::info!(actor = %identity.actor_uri, "Remote actor is gone, marked deleted");
    identity.deleted_at = Some(now);
    identity.updated_at = now;
    Ok(identity)
}
