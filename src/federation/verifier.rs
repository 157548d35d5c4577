//! Inbound HTTP Signature verification
//!
//! Resolves the signing actor local-first and checks the request against
//! its imported public key. A failed check against a stored key triggers
//! one refetch of the actor, since remote servers rotate keys. Refetches
//! are limited to one per actor per cooldown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::HeaderMap;
use tokio::sync::RwLock;

use super::resolver::Resolver;
use super::signature::{
    SignatureError, extract_signature_key_id, key_owner, verify_signature,
};
use crate::data::Identity;
use crate::error::AppError;

/// Minimum time between key refetches for one actor
const KEY_REFRESH_COOLDOWN: Duration = Duration::from_secs(60);

const MAX_TRACKED_ACTORS: usize = 10_000;

/// Verifies signed requests against resolved actor keys
#[derive(Clone)]
pub struct ActorKeyVerifier {
    resolver: Resolver,
    /// Actor URI -> time of its last key refetch
    recent_refreshes: Arc<RwLock<HashMap<String, Instant>>>,
}

impl ActorKeyVerifier {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            recent_refreshes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a key refetch for `owner` unless one happened within the cooldown
    async fn claim_refresh(&self, owner: &str, now: Instant) -> bool {
        let mut recent = self.recent_refreshes.write().await;
        if recent
            .get(owner)
            .is_some_and(|at| now.saturating_duration_since(*at) < KEY_REFRESH_COOLDOWN)
        {
            return false;
        }
        if recent.len() >= MAX_TRACKED_ACTORS {
            recent.retain(|_, at| now.saturating_duration_since(*at) < KEY_REFRESH_COOLDOWN);
        }
        if recent.len() >= MAX_TRACKED_ACTORS {
            // Every tracked actor is cooling down; refuse rather than grow
            return false;
        }
        recent.insert(owner.to_string(), now);
        true
    }

    /// Verify a signed request and return the signing identity
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path` - Request path and query
    /// * `headers` - Request headers, including `Signature`
    /// * `body` - Request body, if any (checked against `Digest`)
    ///
    /// # Errors
    /// `InvalidSignature` if the header is unusable, the actor has no
    /// matching key, or the signature does not verify. Resolution errors
    /// for the signing actor are returned as they are.
    pub async fn verify_request(
        &self,
        method: &str,
        path: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<Identity, AppError> {
        let key_id = extract_signature_key_id(headers)?;
        let owner = key_owner(&key_id);

        let identity = self.resolver.resolve_identity(owner, true).await?;
        match check_key(&identity, &key_id, method, path, headers, body) {
            Ok(()) => Ok(identity),
            Err(error @ (SignatureError::Verification | SignatureError::UnknownSigner(_)))
                if !identity.local =>
            {
                if !self.claim_refresh(owner, Instant::now()).await {
                    tracing::debug!(key_id = %key_id, "Actor key refetched recently, not retrying");
                    return Err(error.into());
                }
                tracing::info!(key_id = %key_id, "Signature check failed, refetching actor key");
                let refreshed = self.resolver.refresh_actor(owner).await?;
                check_key(&refreshed, &key_id, method, path, headers, body)?;
                Ok(refreshed)
            }
            Err(error) => Err(error.into()),
        }
    }
}

fn check_key(
    identity: &Identity,
    key_id: &str,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: Option<&[u8]>,
) -> Result<(), SignatureError> {
    if identity.is_deleted() {
        return Err(SignatureError::UnknownSigner(format!(
            "{} is deleted",
            identity.actor_uri
        )));
    }
    let public_key_pem = match (&identity.public_key_id, &identity.public_key_pem) {
        (Some(id), Some(pem)) if id == key_id => pem,
        _ => {
            return Err(SignatureError::UnknownSigner(format!(
                "{} has no key {}",
                identity.actor_uri, key_id
            )));
        }
    };
    verify_signature(method, path, headers, body, public_key_pem)
}
