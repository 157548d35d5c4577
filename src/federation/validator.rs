//! Shape checks for fetched documents
//!
//! Pure functions: a fetched document either becomes a
//! [`ValidatedDocument`] of the expected kind or fails with a
//! [`SchemaError`]. Nothing here touches the network or the store.

use serde_json::Value;
use std::fmt;

use super::error::SchemaError;
use super::ld;

/// What a resolution expects the document to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Post,
    Actor,
}

const POST_TYPES: [&str; 8] = [
    "Note", "Article", "Question", "Page", "Video", "Audio", "Image", "Event",
];

const ACTOR_TYPES: [&str; 5] = ["Person", "Service", "Application", "Group", "Organization"];

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Actor => "actor",
        }
    }

    /// ActivityStreams types accepted for this kind
    pub fn accepted_types(&self) -> &'static [&'static str] {
        match self {
            Self::Post => &POST_TYPES,
            Self::Actor => &ACTOR_TYPES,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document known to have the shape of its kind
#[derive(Debug, Clone)]
pub struct ValidatedDocument {
    pub kind: ObjectKind,
    /// The document's `id`
    pub id: String,
    pub object_type: String,
    /// Owning actor; always present for posts
    pub attributed_to: Option<String>,
    pub document: Value,
}

impl ValidatedDocument {
    /// Require that the document was served by the host it claims to be from
    pub fn check_origin(&self, served_from: &str) -> Result<(), SchemaError> {
        let id_host = ld::host_of(&self.id);
        let served_host = ld::host_of(served_from);
        if id_host.is_none() || id_host != served_host {
            return Err(SchemaError::new(
                self.kind,
                format!("id {} was served from {}", self.id, served_from),
            ));
        }
        Ok(())
    }
}

fn require_http_url(kind: ObjectKind, field: &str, value: &str) -> Result<(), SchemaError> {
    let url = url::Url::parse(value)
        .map_err(|_| SchemaError::new(kind, format!("{} is not an absolute URL", field)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SchemaError::new(
            kind,
            format!("{} must be an http(s) URL", field),
        ));
    }
    Ok(())
}

/// Check `document` against the requirements of `expected`
///
/// # Errors
/// `SchemaError` if `id` or `type` are missing or not strings, if the type is
/// not one of the kind's accepted types, or if a post lacks an
/// `attributedTo` on the same host as its `id`.
pub fn validate(document: Value, expected: ObjectKind) -> Result<ValidatedDocument, SchemaError> {
    if !document.is_object() {
        return Err(SchemaError::new(expected, "document is not a JSON object"));
    }

    let id = match document.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(_) => return Err(SchemaError::new(expected, "id must be a string")),
        None => return Err(SchemaError::new(expected, "missing id")),
    };
    require_http_url(expected, "id", &id)?;

    let object_type = match document.get("type") {
        Some(Value::String(object_type)) => object_type.clone(),
        Some(_) => return Err(SchemaError::new(expected, "type must be a string")),
        None => return Err(SchemaError::new(expected, "missing type")),
    };
    if !expected.accepted_types().contains(&object_type.as_str()) {
        return Err(SchemaError::new(
            expected,
            format!("unexpected type {}", object_type),
        ));
    }

    let attributed_to = match expected {
        ObjectKind::Post => {
            let author = document
                .get("attributedTo")
                .and_then(ld::first_id)
                .ok_or_else(|| SchemaError::new(expected, "missing attributedTo"))?;
            require_http_url(expected, "attributedTo", &author)?;
            if ld::host_of(&author) != ld::host_of(&id) {
                return Err(SchemaError::new(
                    expected,
                    "attributedTo is on a different host than id",
                ));
            }
            Some(author)
        }
        ObjectKind::Actor => None,
    };

    Ok(ValidatedDocument {
        kind: expected,
        id,
        object_type,
        attributed_to,
        document,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note() -> Value {
        json!({
            "id": "https://example.com/test-post",
            "type": "Note",
            "content": "BEEEEEES",
            "attributedTo": "https://example.com/test-actor",
            "published": "2022-11-13T23:20:16Z",
        })
    }

    #[test]
    fn accepts_note() {
        let validated = validate(note(), ObjectKind::Post).unwrap();
        assert_eq!(validated.object_type, "Note");
        assert_eq!(
            validated.attributed_to.as_deref(),
            Some("https://example.com/test-actor")
        );
    }

    #[test]
    fn accepts_minimal_actor() {
        let actor = json!({"id": "https://example.com/test-actor", "type": "Person"});
        let validated = validate(actor, ObjectKind::Actor).unwrap();
        assert_eq!(validated.id, "https://example.com/test-actor");
        assert!(validated.attributed_to.is_none());
    }

    #[test]
    fn rejects_wrong_kind() {
        let error = validate(note(), ObjectKind::Actor).unwrap_err();
        assert!(error.reason.contains("unexpected type Note"));
    }

    #[test]
    fn rejects_missing_or_non_string_fields() {
        let mut document = note();
        document.as_object_mut().unwrap().remove("id");
        assert!(validate(document, ObjectKind::Post).is_err());

        let mut document = note();
        document["type"] = json!(["Note"]);
        assert!(validate(document, ObjectKind::Post).is_err());

        let mut document = note();
        document.as_object_mut().unwrap().remove("attributedTo");
        assert!(validate(document, ObjectKind::Post).is_err());

        assert!(validate(json!("Note"), ObjectKind::Post).is_err());
    }

    #[test]
    fn rejects_cross_origin_author() {
        let mut document = note();
        document["attributedTo"] = json!("https://evil.example/users/mallory");
        let error = validate(document, ObjectKind::Post).unwrap_err();
        assert!(error.reason.contains("different host"));
    }

    #[test]
    fn attributed_to_may_be_a_list_of_objects() {
        let mut document = note();
        document["attributedTo"] = json!([{"type": "Person", "id": "https://example.com/test-actor"}]);
        assert!(validate(document, ObjectKind::Post).is_ok());
    }

    #[test]
    fn origin_check_compares_hosts() {
        let validated = validate(note(), ObjectKind::Post).unwrap();
        assert!(validated.check_origin("https://example.com/test-post").is_ok());
        assert!(validated.check_origin("https://other.example/test-post").is_err());
    }
}
