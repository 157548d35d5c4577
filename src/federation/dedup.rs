//! Canonicalization and deduplication
//!
//! At most one record exists per remote URI. The storage layer enforces it
//! with a unique index; [`DedupStore::get_or_create`] turns the resulting
//! constraint violation into a lookup, so the loser of a race discards its
//! record and returns the winner's. No in-process lock is held, which keeps
//! the guarantee valid across processes sharing one database.

use std::future::Future;
use std::sync::Arc;

use super::validator::ObjectKind;
use crate::data::{Database, DatabaseError, Identity, Post};

/// Attempts at insert before settling on a final lookup
const MAX_ATTEMPTS: usize = 2;

/// Local materialization of a remote entity
pub trait CanonicalRecord: Send + Sync + 'static {
    const KIND: ObjectKind;

    /// Remote URI the record is keyed by
    fn remote_uri(&self) -> &str;

    fn local_id(&self) -> &str;
}

impl CanonicalRecord for Post {
    const KIND: ObjectKind = ObjectKind::Post;

    fn remote_uri(&self) -> &str {
        &self.object_uri
    }

    fn local_id(&self) -> &str {
        &self.id
    }
}

impl CanonicalRecord for Identity {
    const KIND: ObjectKind = ObjectKind::Actor;

    fn remote_uri(&self) -> &str {
        &self.actor_uri
    }

    fn local_id(&self) -> &str {
        &self.id
    }
}

/// Keyed storage for one record type
///
/// `insert` must fail with [`DatabaseError::UniqueViolation`] when a record
/// with the same remote URI already exists.
pub trait RecordStore<R: CanonicalRecord>: Send + Sync {
    fn find_by_uri(
        &self,
        uri: &str,
    ) -> impl Future<Output = Result<Option<R>, DatabaseError>> + Send;

    fn insert(&self, record: &R) -> impl Future<Output = Result<(), DatabaseError>> + Send;
}

impl RecordStore<Post> for Database {
    async fn find_by_uri(&self, uri: &str) -> Result<Option<Post>, DatabaseError> {
        self.get_post_by_object_uri(uri).await
    }

    async fn insert(&self, record: &Post) -> Result<(), DatabaseError> {
        self.insert_post(record).await
    }
}

impl RecordStore<Identity> for Database {
    async fn find_by_uri(&self, uri: &str) -> Result<Option<Identity>, DatabaseError> {
        self.get_identity_by_actor_uri(uri).await
    }

    async fn insert(&self, record: &Identity) -> Result<(), DatabaseError> {
        self.insert_identity(record).await
    }
}

/// Outcome of [`DedupStore::get_or_create`]
#[derive(Debug)]
pub enum Materialized<R> {
    /// This call inserted the record
    Created(R),
    /// The record already existed, or a concurrent call inserted it first
    Existing(R),
}

impl<R> Materialized<R> {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn into_record(self) -> R {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error(transparent)]
    Store(DatabaseError),

    /// Insert kept colliding yet no record could be found
    #[error("uniqueness conflict could not be resolved")]
    ConflictRetryExhausted,
}

/// Get-or-create front end over a [`RecordStore`]
pub struct DedupStore<S> {
    store: Arc<S>,
}

impl<S> Clone for DedupStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> DedupStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Look up a record by remote URI
    pub async fn find<R>(&self, uri: &str) -> Result<Option<R>, DatabaseError>
    where
        R: CanonicalRecord,
        S: RecordStore<R>,
    {
        self.store.find_by_uri(uri).await
    }

    /// Return the record for `uri`, inserting the one `build` makes if none exists
    ///
    /// `build` runs at most twice: once for the first insert attempt and
    /// once more if that attempt collided with a record that then vanished.
    /// A record built by a losing call is dropped.
    pub async fn get_or_create<R, F>(
        &self,
        uri: &str,
        mut build: F,
    ) -> Result<Materialized<R>, DedupError>
    where
        R: CanonicalRecord,
        S: RecordStore<R>,
        F: FnMut() -> R,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(existing) = self.find(uri).await.map_err(DedupError::Store)? {
                return Ok(Materialized::Existing(existing));
            }

            let record = build();
            debug_assert_eq!(record.remote_uri(), uri);
            match self.store.insert(&record).await {
                Ok(()) => {
                    tracing::debug!(
                        kind = %R::KIND,
                        uri = %uri,
                        id = %record.local_id(),
                        "Materialized record"
                    );
                    return Ok(Materialized::Created(record));
                }
                Err(error) if error.is_unique_violation() => {
                    use crate::metrics::DEDUP_CONFLICTS_TOTAL;
                    DEDUP_CONFLICTS_TOTAL
                        .with_label_values(&[R::KIND.as_str()])
                        .inc();
                    tracing::info!(
                        kind = %R::KIND,
                        uri = %uri,
                        attempt,
                        "Lost insert race, retrying as lookup"
                    );
                }
                Err(error) => return Err(DedupError::Store(error)),
            }
        }

        match self.find(uri).await.map_err(DedupError::Store)? {
            Some(existing) => Ok(Materialized::Existing(existing)),
            None => {
                tracing::error!(kind = %R::KIND, uri = %uri, "Uniqueness conflict never settled");
                Err(DedupError::ConflictRetryExhausted)
            }
        }
    }
}
