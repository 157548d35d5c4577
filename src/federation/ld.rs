//! JSON-LD property accessors
//!
//! ActivityPub documents are compacted JSON-LD, so most properties may be a
//! single value, an array, a bare URI or an embedded object. These helpers
//! read properties leniently without a full JSON-LD expansion.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// The `as:Public` collection, in each of its accepted spellings
pub const PUBLIC_ADDRESSES: [&str; 3] = [
    "https://www.w3.org/ns/activitystreams#Public",
    "as:Public",
    "Public",
];

/// ID of a property value that is either a URI string or an object with `id`
pub fn object_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(string) => Some(string.to_owned()),
        Value::Object(object) => object.get("id")?.as_str().map(str::to_owned),
        _ => None,
    }
}

/// ID of the first item of a property that may be a single value or an array
pub fn first_id(value: &Value) -> Option<String> {
    match value {
        Value::Array(array) => array.iter().find_map(object_to_id),
        other => object_to_id(other),
    }
}

/// Values of a property as a list; missing and null give an empty list
pub fn get_list<'a>(document: &'a Value, key: &str) -> Vec<&'a Value> {
    match document.get(key) {
        None | Some(Value::Null) => vec![],
        Some(Value::Array(array)) => array.iter().collect(),
        Some(value) => vec![value],
    }
}

/// IDs of every item of a property, skipping items without one
pub fn get_id_list(document: &Value, key: &str) -> Vec<String> {
    get_list(document, key)
        .into_iter()
        .filter_map(object_to_id)
        .collect()
}

/// String property, or the first value of its language map
///
/// `get_value_or_map(doc, "content", "contentMap")`
pub fn get_value_or_map(document: &Value, key: &str, map_key: &str) -> Option<String> {
    if let Some(value) = document.get(key).and_then(Value::as_str) {
        return Some(value.to_owned());
    }
    document
        .get(map_key)?
        .as_object()?
        .values()
        .find_map(Value::as_str)
        .map(str::to_owned)
}

/// String property, unwrapping a JSON-LD value object (`{"@value": ...}`)
pub fn get_str(document: &Value, key: &str) -> Option<String> {
    match document.get(key)? {
        Value::String(string) => Some(string.to_owned()),
        Value::Object(object) => object.get("@value")?.as_str().map(str::to_owned),
        _ => None,
    }
}

/// Boolean property; absent or non-boolean values give `None`
pub fn get_bool(document: &Value, key: &str) -> Option<bool> {
    document.get(key)?.as_bool()
}

/// Link target of a property that may be a URI, a Link, an Image or a list
pub fn link_href(value: &Value) -> Option<String> {
    match value {
        Value::String(string) => Some(string.to_owned()),
        Value::Array(array) => array.iter().find_map(link_href),
        Value::Object(object) => {
            if let Some(href) = object.get("href").and_then(Value::as_str) {
                return Some(href.to_owned());
            }
            object.get("url").and_then(link_href)
        }
        _ => None,
    }
}

/// Parse an `xsd:dateTime` as published by common servers
pub fn parse_ld_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    // Some servers omit the offset entirely
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Date property parsed with [`parse_ld_date`]
pub fn get_date(document: &Value, key: &str) -> Option<DateTime<Utc>> {
    document
        .get(key)
        .and_then(Value::as_str)
        .and_then(parse_ld_date)
}

/// Lowercased host of an absolute URI
pub fn host_of(uri: &str) -> Option<String> {
    let url = url::Url::parse(uri).ok()?;
    url.host_str().map(|host| host.to_ascii_lowercase())
}

pub fn is_public_address(address: &str) -> bool {
    PUBLIC_ADDRESSES.contains(&address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_id_accepts_strings_objects_and_lists() {
        assert_eq!(
            first_id(&json!("https://a.example/u")).as_deref(),
            Some("https://a.example/u")
        );
        assert_eq!(
            first_id(&json!({"id": "https://a.example/u", "type": "Person"})).as_deref(),
            Some("https://a.example/u")
        );
        assert_eq!(
            first_id(&json!([{"type": "Person"}, "https://a.example/v"])).as_deref(),
            Some("https://a.example/v")
        );
        assert_eq!(first_id(&json!(42)), None);
    }

    #[test]
    fn value_or_map_falls_back_to_language_map() {
        let document = json!({"contentMap": {"en": "<p>hi</p>"}});
        assert_eq!(
            get_value_or_map(&document, "content", "contentMap").as_deref(),
            Some("<p>hi</p>")
        );

        let document = json!({"content": "direct", "contentMap": {"en": "mapped"}});
        assert_eq!(
            get_value_or_map(&document, "content", "contentMap").as_deref(),
            Some("direct")
        );
    }

    #[test]
    fn get_str_unwraps_value_objects() {
        let document = json!({"preferredUsername": {"@value": "Alice"}});
        assert_eq!(get_str(&document, "preferredUsername").as_deref(), Some("Alice"));
    }

    #[test]
    fn link_href_reads_nested_image_urls() {
        let icon = json!({"type": "Image", "url": {"type": "Link", "href": "https://a.example/i.png"}});
        assert_eq!(link_href(&icon).as_deref(), Some("https://a.example/i.png"));
    }

    #[test]
    fn parse_ld_date_accepts_zulu_and_naive() {
        let zulu = parse_ld_date("2022-11-13T23:20:16Z").unwrap();
        let naive = parse_ld_date("2022-11-13T23:20:16").unwrap();
        assert_eq!(zulu, naive);
        assert!(parse_ld_date("yesterday").is_none());
    }
}
