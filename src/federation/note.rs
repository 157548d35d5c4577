//! Post content extraction
//!
//! Turns a validated post document into the fields of a [`Post`] row.
//! Mentioned actors are recorded by URI only and never fetched.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;

use super::ld;
use super::validator::ValidatedDocument;
use crate::data::{EntityId, Identity, Post, PostAttachment, Visibility};

/// Longest hashtag kept, in characters
pub const MAX_HASHTAG_LENGTH: usize = 100;

const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Custom emoji referenced by a remote post
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEmoji {
    pub shortcode: String,
    pub image_url: String,
}

/// Content of a remote post, independent of its local row
#[derive(Debug, Clone)]
pub struct ParsedPost {
    pub object_uri: String,
    pub object_type: String,
    pub url: String,
    pub content: String,
    pub summary: Option<String>,
    pub sensitive: bool,
    pub visibility: Visibility,
    pub in_reply_to: Option<String>,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub emojis: Vec<RemoteEmoji>,
    pub attachments: Vec<PostAttachment>,
    pub published_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl ParsedPost {
    /// Extract post fields; `author` decides followers-only visibility
    pub fn parse(validated: &ValidatedDocument, author: &Identity) -> Self {
        let document = &validated.document;

        let mut content = ld::get_value_or_map(document, "content", "contentMap");
        let mut summary = ld::get_str(document, "summary")
            .or_else(|| ld::get_str(document, "name"))
            .filter(|summary| !summary.is_empty());
        if content.as_deref().is_none_or(str::is_empty) && summary.is_some() {
            content = summary.take();
        }

        let mut hashtags: Vec<String> = Vec::new();
        let mut mentions: Vec<String> = Vec::new();
        let mut emojis = Vec::new();
        for tag in ld::get_list(document, "tag") {
            match tag.get("type").and_then(Value::as_str) {
                Some("Hashtag") => {
                    if let Some(hashtag) = tag
                        .get("name")
                        .and_then(Value::as_str)
                        .and_then(normalize_hashtag)
                    {
                        if !hashtags.contains(&hashtag) {
                            hashtags.push(hashtag);
                        }
                    }
                }
                Some("Mention") => {
                    if let Some(href) = tag.get("href").and_then(ld::link_href) {
                        if !mentions.contains(&href) {
                            mentions.push(href);
                        }
                    }
                }
                Some("Emoji") => {
                    let shortcode = tag
                        .get("name")
                        .and_then(Value::as_str)
                        .map(|name| name.trim_matches(':').to_string())
                        .filter(|name| !name.is_empty());
                    let image_url = tag.get("icon").and_then(ld::link_href);
                    if let (Some(shortcode), Some(image_url)) = (shortcode, image_url) {
                        emojis.push(RemoteEmoji {
                            shortcode,
                            image_url,
                        });
                    }
                }
                _ => {}
            }
        }

        Self {
            object_uri: validated.id.clone(),
            object_type: validated.object_type.clone(),
            url: document
                .get("url")
                .and_then(ld::link_href)
                .unwrap_or_else(|| validated.id.clone()),
            content: sanitize_html(content.as_deref().unwrap_or_default()),
            summary: summary.map(|summary| sanitize_html(&summary)),
            sensitive: ld::get_bool(document, "sensitive").unwrap_or(false),
            visibility: visibility(document, author),
            in_reply_to: document.get("inReplyTo").and_then(ld::first_id),
            hashtags,
            mentions,
            emojis,
            attachments: ld::get_list(document, "attachment")
                .into_iter()
                .filter_map(parse_attachment)
                .collect(),
            published_at: ld::get_date(document, "published"),
            edited_at: ld::get_date(document, "updated"),
        }
    }

    /// Build a new row authored by `author_id`
    pub fn into_post(self, author_id: &str, now: DateTime<Utc>) -> Post {
        let mut post = Post {
            id: EntityId::new().0,
            object_uri: self.object_uri.clone(),
            author_id: author_id.to_string(),
            local: false,
            object_type: String::new(),
            url: String::new(),
            content: String::new(),
            summary: None,
            sensitive: false,
            visibility: String::new(),
            in_reply_to: None,
            hashtags: Json(Vec::new()),
            mentions: Json(Vec::new()),
            attachments: Json(Vec::new()),
            published_at: None,
            edited_at: None,
            fetched_at: Some(now),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.apply_to(&mut post, author_id, now);
        post
    }

    /// Overwrite the content fields of an existing row
    ///
    /// The local ID, object URI and creation time are kept. A re-fetched
    /// post is live again, so any soft delete is cleared.
    pub fn apply_to(self, post: &mut Post, author_id: &str, now: DateTime<Utc>) {
        post.author_id = author_id.to_string();
        post.object_type = self.object_type;
        post.url = self.url;
        post.content = self.content;
        post.summary = self.summary;
        post.sensitive = self.sensitive;
        post.visibility = self.visibility.as_str().to_string();
        post.in_reply_to = self.in_reply_to;
        post.hashtags = Json(self.hashtags);
        post.mentions = Json(self.mentions);
        post.attachments = Json(self.attachments);
        post.published_at = self.published_at.or(post.published_at);
        post.edited_at = self.edited_at;
        post.fetched_at = Some(now);
        post.updated_at = now;
        post.deleted_at = None;
    }
}

fn sanitize_html(content: &str) -> String {
    ammonia::clean(content)
}

/// Lowercase, strip the leading `#`, cap the length
fn normalize_hashtag(name: &str) -> Option<String> {
    let hashtag: String = name
        .trim()
        .trim_start_matches('#')
        .to_lowercase()
        .chars()
        .take(MAX_HASHTAG_LENGTH)
        .collect();
    (!hashtag.is_empty()).then_some(hashtag)
}

/// Visibility from addressing
///
/// Public if `to` has the public collection, unlisted if `cc` does,
/// followers-only if `to` has the author's followers collection, otherwise
/// only the mentioned actors can see it.
fn visibility(document: &Value, author: &Identity) -> Visibility {
    let to = ld::get_id_list(document, "to");
    let cc = ld::get_id_list(document, "cc");

    if to.iter().any(|address| ld::is_public_address(address)) {
        Visibility::Public
    } else if cc.iter().any(|address| ld::is_public_address(address)) {
        Visibility::Unlisted
    } else if author
        .followers_uri
        .as_ref()
        .is_some_and(|followers| to.contains(followers))
    {
        Visibility::Followers
    } else {
        Visibility::Mentioned
    }
}

fn parse_attachment(attachment: &Value) -> Option<PostAttachment> {
    let url = attachment
        .get("url")
        .and_then(ld::link_href)
        .or_else(|| attachment.get("href").and_then(Value::as_str).map(str::to_owned))?;

    let media_type = attachment
        .get("mediaType")
        .and_then(Value::as_str)
        .filter(|media_type| !media_type.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| guess_media_type(&url).to_string());

    let (focal_x, focal_y) = match attachment.get("focalPoint").and_then(Value::as_array) {
        Some(point) if point.len() == 2 => (point[0].as_f64(), point[1].as_f64()),
        _ => (None, None),
    };

    Some(PostAttachment {
        url,
        media_type,
        name: ld::get_str(attachment, "name"),
        width: attachment.get("width").and_then(Value::as_i64),
        height: attachment.get("height").and_then(Value::as_i64),
        blurhash: ld::get_str(attachment, "blurhash"),
        focal_x,
        focal_y,
    })
}

/// Media type from a URL's file extension
fn guess_media_type(url: &str) -> &'static str {
    let path = url::Url::parse(url)
        .map(|url| url.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "avif" => "image/avif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        _ => DEFAULT_MEDIA_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::validator::{ObjectKind, validate};
    use serde_json::json;

    fn author() -> Identity {
        let now = Utc::now();
        Identity {
            id: EntityId::new().0,
            actor_uri: "https://example.com/test-actor".to_string(),
            local: false,
            username: Some("test".to_string()),
            domain: Some("example.com".to_string()),
            name: None,
            summary: None,
            profile_uri: None,
            inbox_uri: None,
            outbox_uri: None,
            shared_inbox_uri: None,
            followers_uri: Some("https://example.com/test-actor/followers".to_string()),
            following_uri: None,
            icon_uri: None,
            image_uri: None,
            manually_approves_followers: false,
            discoverable: true,
            public_key_id: None,
            public_key_pem: None,
            private_key_pem: None,
            fetched_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn parse(document: Value) -> ParsedPost {
        let validated = validate(document, ObjectKind::Post).unwrap();
        ParsedPost::parse(&validated, &author())
    }

    fn note(extra: Value) -> Value {
        let mut document = json!({
            "id": "https://example.com/test-post",
            "type": "Note",
            "content": "BEEEEEES",
            "attributedTo": "https://example.com/test-actor",
            "published": "2022-11-13T23:20:16Z",
        });
        if let (Some(base), Some(extra)) = (document.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        document
    }

    #[test]
    fn parses_basic_note() {
        let post = parse(note(json!({})));
        assert_eq!(post.content, "BEEEEEES");
        assert_eq!(post.url, "https://example.com/test-post");
        assert_eq!(post.visibility, Visibility::Mentioned);
        assert_eq!(
            post.published_at.unwrap().to_rfc3339(),
            "2022-11-13T23:20:16+00:00"
        );
    }

    #[test]
    fn summary_becomes_content_when_content_missing() {
        let mut document = note(json!({"name": "A poll"}));
        document.as_object_mut().unwrap().remove("content");
        let post = parse(document);
        assert_eq!(post.content, "A poll");
        assert!(post.summary.is_none());
    }

    #[test]
    fn content_is_sanitized() {
        let post = parse(note(json!({"content": "<p>hi<script>alert(1)</script></p>"})));
        assert_eq!(post.content, "<p>hi</p>");
    }

    #[test]
    fn visibility_follows_addressing() {
        let public = "https://www.w3.org/ns/activitystreams#Public";
        assert_eq!(parse(note(json!({"to": [public]}))).visibility, Visibility::Public);
        assert_eq!(
            parse(note(json!({"to": [], "cc": "as:Public"}))).visibility,
            Visibility::Unlisted
        );
        assert_eq!(
            parse(note(json!({"to": "https://example.com/test-actor/followers"}))).visibility,
            Visibility::Followers
        );
    }

    #[test]
    fn tags_are_extracted() {
        let post = parse(note(json!({
            "tag": [
                {"type": "Hashtag", "name": "#Rust"},
                {"type": "Hashtag", "name": "#rust"},
                {"type": "Mention", "href": "https://other.example/users/bob", "name": "@bob@other.example"},
                {"type": "Emoji", "name": ":blobcat:", "icon": {"type": "Image", "url": "https://example.com/blobcat.png"}},
            ]
        })));
        assert_eq!(post.hashtags, vec!["rust"]);
        assert_eq!(post.mentions, vec!["https://other.example/users/bob"]);
        assert_eq!(
            post.emojis,
            vec![RemoteEmoji {
                shortcode: "blobcat".to_string(),
                image_url: "https://example.com/blobcat.png".to_string(),
            }]
        );
    }

    #[test]
    fn long_hashtags_are_truncated() {
        let long = format!("#{}", "a".repeat(150));
        let post = parse(note(json!({"tag": {"type": "Hashtag", "name": long}})));
        assert_eq!(post.hashtags[0].chars().count(), MAX_HASHTAG_LENGTH);
    }

    #[test]
    fn attachments_guess_missing_media_type() {
        let post = parse(note(json!({
            "attachment": [
                {"type": "Document", "url": "https://example.com/a.PNG", "name": "cat", "width": 10, "height": 20, "focalPoint": [0.5, -0.25]},
                {"type": "Document", "url": "https://example.com/blob", "mediaType": "image/webp"},
                {"type": "Document", "url": "https://example.com/unknown"},
                {"type": "Document", "name": "no url"},
            ]
        })));
        assert_eq!(post.attachments.len(), 3);
        assert_eq!(post.attachments[0].media_type, "image/png");
        assert_eq!(post.attachments[0].focal_y, Some(-0.25));
        assert_eq!(post.attachments[1].media_type, "image/webp");
        assert_eq!(post.attachments[2].media_type, DEFAULT_MEDIA_TYPE);
    }

    #[test]
    fn apply_to_keeps_identity_of_row() {
        let now = Utc::now();
        let mut post = parse(note(json!({}))).into_post("author-1", now);
        let id = post.id.clone();
        post.deleted_at = Some(now);

        parse(note(json!({"content": "edited", "updated": "2022-11-14T00:00:00Z"})))
            .apply_to(&mut post, "author-1", now);

        assert_eq!(post.id, id);
        assert_eq!(post.content, "edited");
        assert!(post.edited_at.is_some());
        assert!(post.deleted_at.is_none());
    }
}
