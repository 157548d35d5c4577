//! Content negotiation for outbound object fetches
//!
//! Issues a single GET per fetch (redirects are followed by hand so every
//! hop is re-checked and re-signed), rejects responses that are not
//! ActivityPub documents, and decodes the body honoring a declared charset.

use encoding_rs::{Encoding, UTF_8};
use reqwest::{Client, ClientBuilder, StatusCode, header};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use super::domain::{DomainBlocklist, extract_domain, parse_fetch_url, validate_resolved_host};
use super::error::FetchError;
use super::signature::RequestSigner;
use crate::config::FederationConfig;

/// Accept header sent with every fetch
pub const ACCEPT_ACTIVITYPUB: &str = "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Accept header for WebFinger lookups
pub const ACCEPT_JRD: &str = "application/jrd+json, application/json";

const JRD_CONTENT_TYPES: [&str; 2] = ["application/jrd+json", "application/json"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decoded document plus response metadata
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// URI passed to [`ContentNegotiator::fetch`]
    pub uri: String,
    /// URL the document was finally served from (after redirects)
    pub location: String,
    pub document: Value,
    /// Media type without parameters, lowercased
    pub content_type: String,
    /// Charset declared by the server, if any
    pub charset: Option<String>,
}

/// Outbound fetcher for ActivityPub documents
pub struct ContentNegotiator {
    client: Client,
    accepted_content_types: Vec<String>,
    max_response_bytes: usize,
    max_redirects: usize,
    ssrf_protection: bool,
    blocklist: Arc<DomainBlocklist>,
    signer: Option<RequestSigner>,
}

impl ContentNegotiator {
    /// Client settings shared by every fetch
    ///
    /// Redirects are disabled because each hop must be signed again.
    pub fn client_builder(config: &FederationConfig) -> ClientBuilder {
        Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
    }

    /// Create a negotiator with a client built from configuration
    pub fn new(
        config: &FederationConfig,
        signer: Option<RequestSigner>,
    ) -> Result<Self, FetchError> {
        let client = Self::client_builder(config)
            .build()
            .map_err(|e| FetchError::Unreachable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(config, signer, client))
    }

    /// Create a negotiator around an existing client
    ///
    /// The client should come from [`ContentNegotiator::client_builder`].
    pub fn with_client(
        config: &FederationConfig,
        signer: Option<RequestSigner>,
        client: Client,
    ) -> Self {
        Self {
            client,
            accepted_content_types: config
                .accepted_content_types
                .iter()
                .map(|content_type| content_type.trim().to_ascii_lowercase())
                .collect(),
            max_response_bytes: config.max_response_bytes,
            max_redirects: config.max_redirects,
            ssrf_protection: config.ssrf_protection,
            blocklist: Arc::new(DomainBlocklist::new(&config.blocked_domains)),
            signer,
        }
    }

    /// Domains no request is ever sent to, redirect targets included
    pub fn blocklist(&self) -> &Arc<DomainBlocklist> {
        &self.blocklist
    }

    /// Fetch and decode the document at `uri`
    ///
    /// # Errors
    /// - `UnsafeUrl` if the URL (or a redirect target) is not fetchable
    /// - `BlockedDomain` if any hop is on a blocked domain
    /// - `Unreachable` on transport failure, timeout or 5xx
    /// - `RemoteNotFound` / `Gone` for 404 / 410
    /// - `UnexpectedContentType` if the response is not an accepted type
    /// - `ResponseTooLarge` / `Decode` for unusable bodies
    pub async fn fetch(&self, uri: &str) -> Result<FetchResult, FetchError> {
        self.fetch_as(uri, ACCEPT_ACTIVITYPUB, &self.accepted_content_types)
            .await
    }

    /// Fetch a WebFinger JRD document
    pub async fn fetch_jrd(&self, uri: &str) -> Result<FetchResult, FetchError> {
        let accepted: Vec<String> = JRD_CONTENT_TYPES.iter().map(|t| t.to_string()).collect();
        self.fetch_as(uri, ACCEPT_JRD, &accepted).await
    }

    async fn fetch_as(
        &self,
        uri: &str,
        accept: &str,
        accepted: &[String],
    ) -> Result<FetchResult, FetchError> {
        let started = Instant::now();
        let result = self.fetch_inner(uri, accept, accepted).await;

        use crate::metrics::{FEDERATION_REQUEST_DURATION_SECONDS, FEDERATION_REQUESTS_TOTAL};
        FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["outbound"])
            .observe(started.elapsed().as_secs_f64());
        let status = match &result {
            Ok(_) => "ok",
            Err(error) => error.label(),
        };
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["outbound", status])
            .inc();

        match &result {
            Ok(fetched) => tracing::debug!(
                uri = %uri,
                content_type = %fetched.content_type,
                charset = ?fetched.charset,
                "Fetched remote document"
            ),
            Err(error) => tracing::info!(uri = %uri, error = %error, "Fetch failed"),
        }

        result
    }

    async fn fetch_inner(
        &self,
        uri: &str,
        accept: &str,
        accepted: &[String],
    ) -> Result<FetchResult, FetchError> {
        let mut target = parse_fetch_url(uri, self.ssrf_protection)?;
        let mut redirects = 0;

        let mut response = loop {
            self.check_blocked(&target)?;
            if self.ssrf_protection {
                validate_resolved_host(&target).await?;
            }

            let response = self.send_get(&target, accept).await?;
            let status = response.status();
            if !status.is_redirection() {
                break response;
            }

            redirects += 1;
            if redirects > self.max_redirects {
                return Err(FetchError::Unreachable(format!(
                    "too many redirects for {}",
                    uri
                )));
            }
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|location| location.to_str().ok())
                .and_then(|location| response.url().join(location).ok())
                .ok_or(FetchError::UnexpectedStatus(status.as_u16()))?;
            tracing::debug!(from = %target, to = %location, "Following redirect");
            target = parse_fetch_url(location.as_str(), self.ssrf_protection)?;
        };

        check_status(response.status())?;

        let header_value = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let (content_type, charset) = parse_content_type(&header_value);
        if !accepted.iter().any(|accepted| *accepted == content_type) {
            return Err(FetchError::UnexpectedContentType(header_value));
        }

        let location = response.url().to_string();
        let body = self.read_limited(&mut response).await?;
        let text = decode_body(&body, charset.as_deref())?;
        let document: Value = serde_json::from_str(&text)
            .map_err(|e| FetchError::Decode(format!("invalid JSON: {}", e)))?;

        Ok(FetchResult {
            uri: uri.to_string(),
            location,
            document,
            content_type,
            charset,
        })
    }

    fn check_blocked(&self, target: &Url) -> Result<(), FetchError> {
        match extract_domain(target.as_str()) {
            Some(domain) if self.blocklist.is_blocked(&domain) => {
                Err(FetchError::BlockedDomain(domain))
            }
            _ => Ok(()),
        }
    }

    async fn send_get(&self, target: &Url, accept: &str) -> Result<reqwest::Response, FetchError> {
        let mut request = self
            .client
            .get(target.clone())
            .header(header::ACCEPT, accept);

        if let Some(signer) = &self.signer {
            let signed = signer.sign_get(target.as_str()).map_err(|e| {
                FetchError::Unreachable(format!("failed to sign request: {}", e))
            })?;
            request = request
                .header(header::DATE, signed.date)
                .header("Signature", signed.signature);
        }

        request.send().await.map_err(|error| {
            if error.is_timeout() {
                FetchError::Unreachable(format!("timed out fetching {}", target))
            } else {
                FetchError::Unreachable(error.to_string())
            }
        })
    }

    /// Read the body, giving up as soon as it exceeds the size limit
    async fn read_limited(&self, response: &mut reqwest::Response) -> Result<Vec<u8>, FetchError> {
        let limit = self.max_response_bytes;
        if response
            .content_length()
            .is_some_and(|length| length > limit as u64)
        {
            return Err(FetchError::ResponseTooLarge(limit));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?
        {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::ResponseTooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

fn check_status(status: StatusCode) -> Result<(), FetchError> {
    match status {
        status if status.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(FetchError::RemoteNotFound),
        StatusCode::GONE => Err(FetchError::Gone),
        status if status.is_server_error() => Err(FetchError::Unreachable(format!(
            "remote server error {}",
            status.as_u16()
        ))),
        status => Err(FetchError::UnexpectedStatus(status.as_u16())),
    }
}

/// Split a Content-Type header into its media type and charset parameter
///
/// The media type is lowercased with parameters stripped.
pub fn parse_content_type(value: &str) -> (String, Option<String>) {
    let mut parts = value.split(';');
    let media_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = parts.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_ascii_lowercase())
    });
    (media_type, charset)
}

/// Decode a response body to text
///
/// A declared charset is used exactly: unknown labels and bytes that are
/// invalid in that charset fail. Without one, a byte order mark selects the
/// encoding and UTF-8 is assumed otherwise.
pub fn decode_body(body: &[u8], charset: Option<&str>) -> Result<String, FetchError> {
    match charset {
        Some(label) => {
            let encoding = Encoding::for_label(label.as_bytes())
                .ok_or_else(|| FetchError::Decode(format!("unknown charset {}", label)))?;
            let body = match body.strip_prefix(UTF8_BOM) {
                Some(rest) if encoding == UTF_8 => rest,
                _ => body,
            };
            encoding
                .decode_without_bom_handling_and_without_replacement(body)
                .map(|text| text.into_owned())
                .ok_or_else(|| FetchError::Decode(format!("body is not valid {}", encoding.name())))
        }
        None => {
            let (text, encoding, had_errors) = UTF_8.decode(body);
            if had_errors {
                return Err(FetchError::Decode(format!(
                    "body is not valid {}",
                    encoding.name()
                )));
            }
            Ok(text.into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_content_type_strips_parameters() {
        assert_eq!(
            parse_content_type("Application/Activity+JSON; charset=ISO-8859-1"),
            (
                "application/activity+json".to_string(),
                Some("iso-8859-1".to_string())
            )
        );
        assert_eq!(
            parse_content_type(
                "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\""
            ),
            ("application/ld+json".to_string(), None)
        );
        assert_eq!(parse_content_type(""), (String::new(), None));
    }

    #[test]
    fn declared_charset_is_used() {
        let body = b"{\"name\":\"Caf\xe9\"}";
        let text = decode_body(body, Some("iso-8859-1")).unwrap();
        assert_eq!(text, "{\"name\":\"Café\"}");

        // The same bytes are not UTF-8
        assert!(matches!(decode_body(body, None), Err(FetchError::Decode(_))));
    }

    #[test]
    fn undeclared_charset_sniffs_bom() {
        let mut body = vec![0xFF, 0xFE];
        for unit in "{}".encode_utf16() {
            body.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_body(&body, None).unwrap(), "{}");
        assert_eq!(decode_body("{}".as_bytes(), None).unwrap(), "{}");
    }

    #[test]
    fn declared_utf8_drops_bom() {
        let body = [UTF8_BOM, b"{\"a\":1}".as_slice()].concat();
        assert_eq!(decode_body(&body, Some("utf-8")).unwrap(), "{\"a\":1}");
        assert_eq!(decode_body(&body, Some("UTF8")).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn unknown_charset_fails() {
        assert!(matches!(
            decode_body(b"{}", Some("klingon")),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn status_mapping() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(StatusCode::NOT_FOUND),
            Err(FetchError::RemoteNotFound)
        ));
        assert!(matches!(check_status(StatusCode::GONE), Err(FetchError::Gone)));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(FetchError::Unreachable(_))
        ));
        assert!(matches!(
            check_status(StatusCode::FORBIDDEN),
            Err(FetchError::UnexpectedStatus(403))
        ));
    }
}
