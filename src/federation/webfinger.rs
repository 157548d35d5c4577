//! WebFinger protocol implementation
//!
//! Used to discover ActivityPub actor URIs from handles, to find the
//! canonical handle of a fetched actor, and to answer lookups for the
//! system actor.

use serde::{Deserialize, Serialize};

use super::error::FetchError;
use super::negotiator::ContentNegotiator;

/// WebFinger result
#[derive(Debug, Clone, PartialEq)]
pub struct WebFingerResult {
    /// Canonical handle from the subject (user@domain), if it is an acct URI
    pub handle: Option<String>,
    /// ActivityPub actor URI
    pub actor_uri: String,
}

impl WebFingerResult {
    /// Username and domain of the canonical handle
    pub fn username_and_domain(&self) -> Option<(String, String)> {
        let (username, domain) = self.handle.as_deref()?.split_once('@')?;
        if username.is_empty() || domain.is_empty() {
            return None;
        }
        Some((username.to_lowercase(), domain.to_ascii_lowercase()))
    }
}

/// Split `user@domain` (an optional leading `@` or `acct:` is allowed)
pub fn parse_handle(handle: &str) -> Option<(String, String)> {
    let handle = handle.trim();
    let handle = handle.strip_prefix("acct:").unwrap_or(handle);
    let handle = handle.strip_prefix('@').unwrap_or(handle);
    let (username, domain) = handle.split_once('@')?;
    if username.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some((username.to_string(), domain.to_ascii_lowercase()))
}

/// Build the lookup URL for `acct:{username}@{domain}`
///
/// # Arguments
/// * `base_url` - Scheme and authority of the server to ask (e.g. "https://remote.example")
pub fn webfinger_url(base_url: &str, username: &str, domain: &str) -> String {
    format!(
        "{}/.well-known/webfinger?resource={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(&format!("acct:{}@{}", username, domain))
    )
}

/// Resolve a handle to an ActivityPub actor
///
/// # Arguments
/// * `base_url` - Scheme and authority of the server to ask
/// * `username`, `domain` - Handle parts
/// * `negotiator` - Fetcher used for the lookup
///
/// # Errors
/// Any fetch failure, or `Decode` if the response has no ActivityPub
/// `self` link.
pub async fn resolve_webfinger(
    base_url: &str,
    username: &str,
    domain: &str,
    negotiator: &ContentNegotiator,
) -> Result<WebFingerResult, FetchError> {
    let url = webfinger_url(base_url, username, domain);
    let fetched = negotiator.fetch_jrd(&url).await?;
    let response: WebFingerResponse = serde_json::from_value(fetched.document)
        .map_err(|e| FetchError::Decode(format!("invalid WebFinger response: {}", e)))?;
    response
        .to_result()
        .ok_or_else(|| FetchError::Decode("WebFinger response has no actor link".to_string()))
}

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub links: Vec<WebFingerLink>,
}

impl WebFingerResponse {
    /// Actor URI and canonical handle advertised by this response
    pub fn to_result(&self) -> Option<WebFingerResult> {
        let actor_uri = self.links.iter().find_map(|link| {
            let is_activitypub = link.link_type.as_deref().is_some_and(|link_type| {
                link_type.starts_with("application/activity+json")
                    || link_type.starts_with("application/ld+json")
            });
            (link.rel == "self" && is_activitypub)
                .then(|| link.href.clone())
                .flatten()
        })?;
        let handle = self
            .subject
            .strip_prefix("acct:")
            .filter(|handle| handle.contains('@'))
            .map(str::to_string);
        Some(WebFingerResult { handle, actor_uri })
    }
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Generate WebFinger response for a local actor.
///
/// # Arguments
/// * `username` - Local username
/// * `domain` - Instance domain
/// * `actor_uri` - Actor document URI
/// * `profile_url` - HTML profile page, if the actor has one
///
/// # Returns
/// JRD response for the account
pub fn generate_webfinger_response(
    username: &str,
    domain: &str,
    actor_uri: &str,
    profile_url: Option<&str>,
) -> WebFingerResponse {
    let mut links = vec![WebFingerLink {
        rel: "self".to_string(),
        link_type: Some("application/activity+json".to_string()),
        href: Some(actor_uri.to_string()),
        template: None,
    }];
    if let Some(profile_url) = profile_url {
        links.push(WebFingerLink {
            rel: "http://webfinger.net/rel/profile-page".to_string(),
            link_type: Some("text/html".to_string()),
            href: Some(profile_url.to_string()),
            template: None,
        });
    }

    WebFingerResponse {
        subject: format!("acct:{}@{}", username, domain),
        aliases: Some(vec![actor_uri.to_string()]),
        links,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_handle_accepts_common_forms() {
        let expected = Some(("alice".to_string(), "remote.example".to_string()));
        assert_eq!(parse_handle("alice@remote.example"), expected);
        assert_eq!(parse_handle("@alice@Remote.Example"), expected);
        assert_eq!(parse_handle("acct:alice@remote.example"), expected);
        assert_eq!(parse_handle("alice"), None);
        assert_eq!(parse_handle("a@b@c"), None);
    }

    #[test]
    fn webfinger_url_encodes_resource() {
        assert_eq!(
            webfinger_url("https://remote.example/", "alice", "remote.example"),
            "https://remote.example/.well-known/webfinger?resource=acct%3Aalice%40remote.example"
        );
    }

    #[test]
    fn response_yields_actor_and_handle() {
        let response: WebFingerResponse = serde_json::from_value(json!({
            "subject": "acct:Alice@social.example",
            "links": [
                {"rel": "http://webfinger.net/rel/profile-page", "type": "text/html", "href": "https://social.example/@alice"},
                {"rel": "self", "type": "application/activity+json", "href": "https://remote.example/users/alice"}
            ]
        }))
        .unwrap();

        let result = response.to_result().unwrap();
        assert_eq!(result.actor_uri, "https://remote.example/users/alice");
        assert_eq!(
            result.username_and_domain(),
            Some(("alice".to_string(), "social.example".to_string()))
        );
    }

    #[test]
    fn response_without_self_link_is_rejected() {
        let response: WebFingerResponse =
            serde_json::from_value(json!({"subject": "acct:a@b", "links": []})).unwrap();
        assert!(response.to_result().is_none());
    }

    #[test]
    fn generated_response_round_trips() {
        let response = generate_webfinger_response(
            "__system__",
            "local.example",
            "https://local.example/actor/",
            None,
        );
        assert_eq!(response.subject, "acct:__system__@local.example");
        assert_eq!(
            response.to_result().unwrap().actor_uri,
            "https://local.example/actor/"
        );
    }
}
