//! In-memory caches
//!
//! These caches are volatile and rebuilt from the database on demand.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::database::{Database, DatabaseError};
use super::models::Emoji;

/// Snapshot of the local emoji set
struct EmojiSnapshot {
    emojis: Arc<Vec<Emoji>>,
    /// When the snapshot was loaded, None before the first refresh
    loaded_at: Option<Instant>,
}

/// Local emoji cache
///
/// Holds the process-wide list of local custom emoji. The request entry
/// point calls [`EmojiCache::refresh_if_due`] on every request; the list is
/// reloaded at most once per `refresh_interval`. Reads never touch the
/// database.
pub struct EmojiCache {
    db: Arc<Database>,
    refresh_interval: Duration,
    snapshot: RwLock<EmojiSnapshot>,
}

impl EmojiCache {
    /// Create new emoji cache
    ///
    /// # Arguments
    /// * `db` - Database to load local emoji from
    /// * `refresh_interval` - Minimum time between reloads
    pub fn new(db: Arc<Database>, refresh_interval: Duration) -> Self {
        Self {
            db,
            refresh_interval,
            snapshot: RwLock::new(EmojiSnapshot {
                emojis: Arc::new(Vec::new()),
                loaded_at: None,
            }),
        }
    }

    /// Reload the local emoji set unconditionally
    pub async fn refresh(&self, now: Instant) -> Result<(), DatabaseError> {
        let emojis = self.db.list_local_emojis().await?;
        self.install(emojis, now, Duration::ZERO).await;
        Ok(())
    }

    /// Reload if the cache was never loaded or the interval has elapsed
    ///
    /// A fresh snapshot counts as a cache hit, a reload as a miss.
    ///
    /// # Returns
    /// `true` if this call replaced the snapshot
    pub async fn refresh_if_due(&self, now: Instant) -> Result<bool, DatabaseError> {
        use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

        let loaded_at = self.snapshot.read().await.loaded_at;
        if is_fresh(loaded_at, now, self.refresh_interval) {
            CACHE_HITS_TOTAL.with_label_values(&["emoji"]).inc();
            return Ok(false);
        }
        CACHE_MISSES_TOTAL.with_label_values(&["emoji"]).inc();

        let emojis = self.db.list_local_emojis().await?;
        Ok(self.install(emojis, now, self.refresh_interval).await)
    }

    /// Swap in `emojis` loaded at `now`
    ///
    /// Concurrent reloads race between their staleness check and this swap.
    /// A result is dropped if the snapshot was replaced by one loaded after
    /// `now`, or less than `min_age` before it.
    async fn install(&self, emojis: Vec<Emoji>, now: Instant, min_age: Duration) -> bool {
        let mut snapshot = self.snapshot.write().await;
        if is_fresh(snapshot.loaded_at, now, min_age) {
            tracing::debug!("Emoji cache already reloaded, dropping late result");
            return false;
        }
        snapshot.emojis = Arc::new(emojis);
        snapshot.loaded_at = Some(now);

        use crate::metrics::CACHE_SIZE;
        CACHE_SIZE
            .with_label_values(&["emoji"])
            .set(snapshot.emojis.len() as i64);
        tracing::debug!(count = snapshot.emojis.len(), "Emoji cache refreshed");

        true
    }

    /// Current local emoji, ordered by shortcode
    pub async fn get(&self) -> Arc<Vec<Emoji>> {
        self.snapshot.read().await.emojis.clone()
    }
}

fn is_fresh(loaded_at: Option<Instant>, now: Instant, min_age: Duration) -> bool {
    loaded_at.is_some_and(|loaded_at| {
        loaded_at > now || now.saturating_duration_since(loaded_at) < min_age
    })
}
