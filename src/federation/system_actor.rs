//! System actor
//!
//! The instance's own `Application` actor. It owns the keypair outbound
//! fetches are signed with and is the only local identity.

use chrono::Utc;
use serde_json::{Value, json};

use super::keys::generate_keypair;
use super::signature::{RequestSigner, SignatureError};
use super::webfinger::{WebFingerResponse, generate_webfinger_response};
use crate::config::AppConfig;
use crate::data::{Database, EntityId, Identity};
use crate::error::AppError;

pub const SYSTEM_USERNAME: &str = "__system__";

/// Local actor used to sign outbound requests
#[derive(Debug, Clone)]
pub struct SystemActor {
    identity: Identity,
    private_key_pem: String,
    domain: String,
}

impl SystemActor {
    /// Load the system actor, creating it with a fresh keypair on first start
    ///
    /// # Errors
    /// Database failures, or key generation failure
    pub async fn ensure(db: &Database, config: &AppConfig) -> Result<Self, AppError> {
        let actor_uri = format!("{}/actor/", config.server.base_url());
        let domain = config.server.domain.clone();

        if let Some(identity) = db.get_identity_by_actor_uri(&actor_uri).await? {
            let private_key_pem = identity.private_key_pem.clone().ok_or_else(|| {
                AppError::Config(format!("system actor {} has no private key", actor_uri))
            })?;
            tracing::debug!(actor = %actor_uri, "Loaded system actor");
            return Ok(Self {
                identity,
                private_key_pem,
                domain,
            });
        }

        let bits = config.federation.key_bits;
        let keypair = tokio::task::spawn_blocking(move || generate_keypair(bits))
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("key generation task failed: {}", e))
            })??;

        let now = Utc::now();
        let identity = Identity {
            id: EntityId::new().0,
            actor_uri: actor_uri.clone(),
            local: true,
            username: Some(SYSTEM_USERNAME.to_string()),
            domain: Some(domain.clone()),
            name: Some(domain.clone()),
            summary: None,
            profile_uri: None,
            inbox_uri: Some(format!("{}inbox/", actor_uri)),
            outbox_uri: None,
            shared_inbox_uri: None,
            followers_uri: None,
            following_uri: None,
            icon_uri: None,
            image_uri: None,
            manually_approves_followers: true,
            discoverable: false,
            public_key_id: Some(format!("{}#main-key", actor_uri)),
            public_key_pem: Some(keypair.public_key_pem),
            private_key_pem: Some(keypair.private_key_pem.clone()),
            fetched_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        match db.insert_identity(&identity).await {
            Ok(()) => {
                tracing::info!(actor = %actor_uri, bits, "Created system actor");
                Ok(Self {
                    identity,
                    private_key_pem: keypair.private_key_pem,
                    domain,
                })
            }
            // Another process created it first; use theirs
            Err(error) if error.is_unique_violation() => {
                let identity = db
                    .get_identity_by_actor_uri(&actor_uri)
                    .await?
                    .ok_or(AppError::NotFound)?;
                let private_key_pem = identity.private_key_pem.clone().ok_or_else(|| {
                    AppError::Config(format!("system actor {} has no private key", actor_uri))
                })?;
                Ok(Self {
                    identity,
                    private_key_pem,
                    domain,
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn actor_uri(&self) -> &str {
        &self.identity.actor_uri
    }

    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.identity.actor_uri)
    }

    /// Signer for outbound requests
    pub fn signer(&self) -> RequestSigner {
        RequestSigner::new(self.key_id(), self.private_key_pem.clone())
    }

    /// Check that the stored key pair can sign
    pub fn check_key(&self) -> Result<(), SignatureError> {
        self.signer().sign_get(&self.identity.actor_uri).map(|_| ())
    }

    /// ActivityPub actor document
    pub fn to_ap(&self) -> Value {
        let actor_uri = &self.identity.actor_uri;
        json!({
            "@context": [
                "https://www.w3.org/ns/activitystreams",
                "https://w3id.org/security/v1"
            ],
            "id": actor_uri,
            "type": "Application",
            "preferredUsername": SYSTEM_USERNAME,
            "name": self.identity.name,
            "inbox": self.identity.inbox_uri,
            "manuallyApprovesFollowers": true,
            "discoverable": false,
            "publicKey": {
                "id": self.key_id(),
                "owner": actor_uri,
                "publicKeyPem": self.identity.public_key_pem
            }
        })
    }

    /// WebFinger answer for `acct:__system__@{domain}`
    pub fn to_webfinger(&self) -> WebFingerResponse {
        generate_webfinger_response(
            SYSTEM_USERNAME,
            &self.domain,
            &self.identity.actor_uri,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DatabaseConfig, EmojiConfig, FederationConfig, LoggingConfig, ServerConfig,
    };
    use crate::federation::validator::{ObjectKind, validate};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                domain: "local.example".to_string(),
                protocol: "https".to_string(),
            },
            database: DatabaseConfig {
                path: dir.path().join("test.db"),
                max_connections: 4,
            },
            federation: FederationConfig {
                key_bits: 1024,
                ..FederationConfig::default()
            },
            emoji: EmojiConfig {
                refresh_interval_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn ensure_creates_once() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let db = Database::connect(&config.database.path).await.unwrap();

        let first = SystemActor::ensure(&db, &config).await.unwrap();
        let second = SystemActor::ensure(&db, &config).await.unwrap();

        assert_eq!(first.actor_uri(), "https://local.example/actor/");
        assert_eq!(first.identity().id, second.identity().id);
        assert!(first.identity().local);
        assert_eq!(
            db.count_identities_by_actor_uri(first.actor_uri()).await.unwrap(),
            1
        );
        first.check_key().unwrap();
    }

    #[tokio::test]
    async fn actor_document_validates_and_webfinger_points_back() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let db = Database::connect(&config.database.path).await.unwrap();
        let actor = SystemActor::ensure(&db, &config).await.unwrap();

        let validated = validate(actor.to_ap(), ObjectKind::Actor).unwrap();
        assert_eq!(validated.object_type, "Application");

        let webfinger = actor.to_webfinger();
        assert_eq!(webfinger.subject, "acct:__system__@local.example");
        assert_eq!(
            webfinger.to_result().unwrap().actor_uri,
            "https://local.example/actor/"
        );
    }
}
