//! Database tests

use super::*;
use chrono::Utc;
use sqlx::types::Json;
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn remote_identity(actor_uri: &str) -> Identity {
    let now = Utc::now();
    Identity {
        id: EntityId::new().0,
        actor_uri: actor_uri.to_string(),
        local: false,
        username: Some("alice".to_string()),
        domain: Some("remote.example".to_string()),
        name: Some("Alice".to_string()),
        summary: None,
        profile_uri: None,
        inbox_uri: Some(format!("{}/inbox", actor_uri)),
        outbox_uri: None,
        shared_inbox_uri: None,
        followers_uri: Some(format!("{}/followers", actor_uri)),
        following_uri: None,
        icon_uri: None,
        image_uri: None,
        manually_approves_followers: false,
        discoverable: true,
        public_key_id: Some(format!("{}#main-key", actor_uri)),
        public_key_pem: Some("test_public_key".to_string()),
        private_key_pem: None,
        fetched_at: Some(now),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

fn remote_post(object_uri: &str, author_id: &str) -> Post {
    let now = Utc::now();
    Post {
        id: EntityId::new().0,
        object_uri: object_uri.to_string(),
        author_id: author_id.to_string(),
        local: false,
        object_type: "Note".to_string(),
        url: object_uri.to_string(),
        content: "<p>Hello, world!</p>".to_string(),
        summary: None,
        sensitive: false,
        visibility: Visibility::Public.as_str().to_string(),
        in_reply_to: None,
        hashtags: Json(vec!["rust".to_string()]),
        mentions: Json(Vec::new()),
        attachments: Json(vec![PostAttachment {
            url: "https://remote.example/media/1.png".to_string(),
            media_type: "image/png".to_string(),
            name: Some("a cat".to_string()),
            width: Some(640),
            height: Some(480),
            blurhash: None,
            focal_x: None,
            focal_y: None,
        }]),
        published_at: Some(now),
        edited_at: None,
        fetched_at: Some(now),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_identity_insert_and_lookup() {
    let (db, _temp_dir) = create_test_db().await;
    let identity = remote_identity("https://remote.example/users/alice");

    db.insert_identity(&identity).await.unwrap();

    let by_uri = db
        .get_identity_by_actor_uri("https://remote.example/users/alice")
        .await
        .unwrap()
        .expect("identity by uri");
    assert_eq!(by_uri.id, identity.id);
    assert_eq!(by_uri.handle(), "alice@remote.example");

    let by_id = db.get_identity(&identity.id).await.unwrap();
    assert!(by_id.is_some());
}

#[tokio::test]
async fn test_identity_duplicate_uri_is_unique_violation() {
    let (db, _temp_dir) = create_test_db().await;
    let first = remote_identity("https://remote.example/users/alice");
    let second = remote_identity("https://remote.example/users/alice");

    db.insert_identity(&first).await.unwrap();
    let error = db.insert_identity(&second).await.unwrap_err();

    assert!(error.is_unique_violation(), "got: {error:?}");
    assert_eq!(
        db.count_identities_by_actor_uri("https://remote.example/users/alice")
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_identity_update_in_place() {
    let (db, _temp_dir) = create_test_db().await;
    let mut identity = remote_identity("https://remote.example/users/alice");
    db.insert_identity(&identity).await.unwrap();

    identity.name = Some("Alice Liddell".to_string());
    identity.updated_at = Utc::now();
    assert!(db.update_identity(&identity).await.unwrap());

    let stored = db.get_identity(&identity.id).await.unwrap().unwrap();
    assert_eq!(stored.name.as_deref(), Some("Alice Liddell"));
    assert_eq!(stored.actor_uri, identity.actor_uri);
}

#[tokio::test]
async fn test_identity_by_handle_skips_deleted() {
    let (db, _temp_dir) = create_test_db().await;
    let identity = remote_identity("https://remote.example/users/alice");
    db.insert_identity(&identity).await.unwrap();

    let found = db
        .get_identity_by_handle("Alice", "remote.example")
        .await
        .unwrap()
        .expect("identity by handle");
    assert_eq!(found.id, identity.id);

    assert!(db.mark_identity_deleted(&identity.id, Utc::now()).await.unwrap());
    assert!(
        db.get_identity_by_handle("alice", "remote.example")
            .await
            .unwrap()
            .is_none()
    );
    // Soft-deleted rows stay addressable by URI
    let by_uri = db
        .get_identity_by_actor_uri(&identity.actor_uri)
        .await
        .unwrap()
        .unwrap();
    assert!(by_uri.is_deleted());
}

#[tokio::test]
async fn test_post_crud() {
    let (db, _temp_dir) = create_test_db().await;
    let author = remote_identity("https://remote.example/users/alice");
    db.insert_identity(&author).await.unwrap();

    let post = remote_post("https://remote.example/notes/1", &author.id);
    db.insert_post(&post).await.unwrap();

    let retrieved = db
        .get_post_by_object_uri("https://remote.example/notes/1")
        .await
        .unwrap()
        .expect("post by uri");
    assert_eq!(retrieved.id, post.id);
    assert_eq!(retrieved.content, "<p>Hello, world!</p>");
    assert_eq!(retrieved.hashtags.0, vec!["rust".to_string()]);
    assert_eq!(retrieved.attachments.0.len(), 1);
    assert_eq!(retrieved.attachments.0[0].width, Some(640));

    let deleted_at = Utc::now();
    assert!(db.mark_post_deleted(&post.id, deleted_at).await.unwrap());
    let retrieved = db.get_post(&post.id).await.unwrap().unwrap();
    assert!(retrieved.is_deleted());
}

#[tokio::test]
async fn test_post_duplicate_uri_is_unique_violation() {
    let (db, _temp_dir) = create_test_db().await;
    let author = remote_identity("https://remote.example/users/alice");
    db.insert_identity(&author).await.unwrap();

    db.insert_post(&remote_post("https://remote.example/notes/1", &author.id))
        .await
        .unwrap();
    let error = db
        .insert_post(&remote_post("https://remote.example/notes/1", &author.id))
        .await
        .unwrap_err();

    assert!(matches!(error, DatabaseError::UniqueViolation("post")));
    assert_eq!(
        db.count_posts_by_object_uri("https://remote.example/notes/1")
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_update_post_missing_row() {
    let (db, _temp_dir) = create_test_db().await;
    let post = remote_post("https://remote.example/notes/404", "missing-author");

    assert!(!db.update_post(&post).await.unwrap());
}

#[tokio::test]
async fn test_local_emoji_listing() {
    let (db, _temp_dir) = create_test_db().await;
    let now = Utc::now();
    for (shortcode, domain, local) in [
        ("zebra", None, true),
        ("apple", None, true),
        ("remote", Some("remote.example".to_string()), false),
    ] {
        db.insert_emoji(&Emoji {
            id: EntityId::new().0,
            shortcode: shortcode.to_string(),
            domain,
            local,
            image_url: format!("https://cdn.example/{}.png", shortcode),
            visible_in_picker: true,
            created_at: now,
        })
        .await
        .unwrap();
    }

    let emojis = db.list_local_emojis().await.unwrap();
    let shortcodes: Vec<&str> = emojis.iter().map(|e| e.shortcode.as_str()).collect();
    assert_eq!(shortcodes, vec!["apple", "zebra"]);
}
