//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Outbound fetches are signed with the system actor key so that servers
//! running in authorized-fetch mode answer them.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::{RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Maximum clock skew accepted on the Date header, in seconds
const MAX_DATE_SKEW_SECS: i64 = 300;

/// Signing or verification failure
#[derive(Debug, Error)]
pub enum SignatureError {
    /// Header missing or malformed
    #[error("{0}")]
    Malformed(String),

    /// Key material could not be parsed
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Signature does not match the signing string
    #[error("signature verification failed")]
    Verification,

    /// The signing actor is unknown or has no key
    #[error("unknown signer: {0}")]
    UnknownSigner(String),
}

fn malformed(message: impl Into<String>) -> SignatureError {
    SignatureError::Malformed(message.into())
}

/// `host` header value for a URL, with the port when it is not the default
fn host_header(url: &url::Url) -> Result<String, SignatureError> {
    let host = url
        .host_str()
        .ok_or_else(|| malformed("Missing host in URL"))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Sign an HTTP request
///
/// Creates HTTP Signature header for outgoing requests.
///
/// # Arguments
/// * `method` - HTTP method (e.g., "GET")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PEM format
/// * `key_id` - Full URL to the public key (actor#main-key)
///
/// # Returns
/// Headers to add: Signature, Date, Digest (if body present)
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignatureHeaders, SignatureError> {
    // 1. Parse URL to get host and path
    let parsed_url =
        url::Url::parse(url).map_err(|e| malformed(format!("Invalid URL: {}", e)))?;

    let host = host_header(&parsed_url)?;

    let path = parsed_url.path();
    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    };

    // 2. Generate Date header (RFC 2822 format)
    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

    // 3. Generate Digest if body present
    let digest = body.map(generate_digest);

    // 4. Build signing string
    let request_target = format!("{} {}", method.to_lowercase(), path_and_query);

    let mut signing_parts = vec![
        format!("(request-target): {}", request_target),
        format!("host: {}", host),
        format!("date: {}", date),
    ];

    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    // 5. Sign with RSA-SHA256
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};

    let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;

    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new_unprefixed(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    // 6. Build Signature header
    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        headers_list.join(" "),
        signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
    })
}

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Signs outbound fetches on behalf of one local actor
#[derive(Clone)]
pub struct RequestSigner {
    key_id: String,
    private_key_pem: String,
}

impl RequestSigner {
    pub fn new(key_id: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Signature headers for a bodiless GET of `url`
    pub fn sign_get(&self, url: &str) -> Result<SignatureHeaders, SignatureError> {
        sign_request("GET", url, None, &self.private_key_pem, &self.key_id)
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .ok_or_else(|| malformed(format!("Missing {} header", name)))?
        .to_str()
        .map_err(|_| malformed(format!("Invalid {} header", name)))
}

/// Verify an HTTP request signature
///
/// # Arguments
/// * `method` - HTTP method
/// * `path` - Request path and query
/// * `headers` - All request headers
/// * `body` - Request body (for digest verification)
/// * `public_key_pem` - RSA public key in PEM format
///
/// # Errors
/// - `Malformed` if required headers are missing or stale
/// - `Verification` if the signature does not match
pub fn verify_signature(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    public_key_pem: &str,
) -> Result<(), SignatureError> {
    // 1. Parse Signature header
    let parsed = parse_signature_header(header_str(headers, "signature")?)?;

    // 2. Validate algorithm and required signed headers.
    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(malformed(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        )));
    }

    for required in ["(request-target)", "host", "date"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(malformed(format!("Signed headers must include: {}", required)));
        }
    }

    if body.is_some() && !parsed.headers.iter().any(|h| h == "digest") {
        return Err(malformed("Signed headers must include: digest"));
    }

    // 3. Verify Date is recent.
    let date = DateTime::parse_from_rfc2822(header_str(headers, "date")?)
        .map_err(|_| malformed("Invalid Date format"))?;

    let diff = (Utc::now().timestamp() - date.timestamp()).abs();
    if diff > MAX_DATE_SKEW_SECS {
        return Err(malformed("Date header too old or in future"));
    }

    // 4. If body present, verify Digest.
    if let Some(body_data) = body {
        if header_str(headers, "digest")? != generate_digest(body_data) {
            return Err(malformed("Digest mismatch"));
        }
    }

    // 5. Reconstruct signing string.
    let mut signing_parts = Vec::new();

    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path),
            "host" | "date" | "digest" => header_str(headers, header_name)?.to_string(),
            _ => {
                return Err(malformed(format!(
                    "Unsupported header in signature: {}",
                    header_name
                )));
            }
        };

        signing_parts.push(format!("{}: {}", header_name, value));
    }

    let signing_string = signing_parts.join("\n");

    // 6. Verify RSA signature.
    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| malformed("Invalid signature encoding"))?;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;

    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new_unprefixed(public_key);

    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| malformed(format!("Invalid signature format: {}", e)))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| SignatureError::Verification)?;

    Ok(())
}

/// Extract keyId from Signature header.
pub fn extract_signature_key_id(headers: &http::HeaderMap) -> Result<String, SignatureError> {
    let parsed = parse_signature_header(header_str(headers, "signature")?)?;
    Ok(parsed.key_id)
}

/// Actor URI that owns a key ID (`actor#main-key` -> `actor`)
pub fn key_owner(key_id: &str) -> &str {
    key_id.split('#').next().unwrap_or(key_id)
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, SignatureError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"');

            match key.trim() {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {}
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| malformed("Missing keyId"))?,
        // Mastodon omits algorithm for hs2019
        algorithm: algorithm.unwrap_or_else(|| "hs2019".to_string()),
        headers: headers.ok_or_else(|| malformed("Missing headers"))?,
        signature: signature.ok_or_else(|| malformed("Missing signature"))?,
    })
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}
