//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub emoji: EmojiConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    8
}

/// Outbound federation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// User-Agent sent with every outbound request
    pub user_agent: String,
    /// Timeout for a single outbound request, in seconds
    pub request_timeout_secs: u64,
    /// Content types a fetched document may declare
    pub accepted_content_types: Vec<String>,
    /// Maximum response body size in bytes
    pub max_response_bytes: usize,
    /// Maximum redirects followed per fetch
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Reject private, loopback and link-local destinations
    pub ssrf_protection: bool,
    /// Sign outbound GETs with the system actor key
    pub signed_fetch: bool,
    /// RSA modulus size for generated keys
    pub key_bits: usize,
    /// Ask WebFinger for the canonical handle of fetched actors
    pub webfinger_canonicalize: bool,
    /// Domains (and their subdomains) that are never fetched
    #[serde(default)]
    pub blocked_domains: Vec<String>,
}

fn default_max_redirects() -> usize {
    5
}

impl FederationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: 10,
            accepted_content_types: default_accepted_content_types(),
            max_response_bytes: 2 * 1024 * 1024,
            max_redirects: default_max_redirects(),
            ssrf_protection: true,
            signed_fetch: true,
            key_bits: 2048,
            webfinger_canonicalize: true,
            blocked_domains: Vec::new(),
        }
    }
}

fn default_user_agent() -> String {
    format!("farfetch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_accepted_content_types() -> Vec<String> {
    vec![
        "application/activity+json".to_string(),
        "application/ld+json".to_string(),
    ]
}

/// Local emoji cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmojiConfig {
    /// Seconds between reloads of the local emoji set (default: 30)
    pub refresh_interval_secs: u64,
}

impl EmojiConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FARFETCH__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let federation = FederationConfig::default();

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/farfetch.db")?
            .set_default("database.max_connections", default_max_connections())?
            .set_default("federation.user_agent", federation.user_agent)?
            .set_default(
                "federation.request_timeout_secs",
                federation.request_timeout_secs,
            )?
            .set_default(
                "federation.accepted_content_types",
                federation.accepted_content_types,
            )?
            .set_default(
                "federation.max_response_bytes",
                federation.max_response_bytes as u64,
            )?
            .set_default("federation.max_redirects", federation.max_redirects as u64)?
            .set_default("federation.ssrf_protection", federation.ssrf_protection)?
            .set_default("federation.signed_fetch", federation.signed_fetch)?
            .set_default("federation.key_bits", federation.key_bits as u64)?
            .set_default(
                "federation.webfinger_canonicalize",
                federation.webfinger_canonicalize,
            )?
            .set_default("federation.blocked_domains", Vec::<String>::new())?
            .set_default("emoji.refresh_interval_secs", 30)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (FARFETCH__*)
            .add_source(
                Environment::with_prefix("FARFETCH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("federation.accepted_content_types")
                    .with_list_parse_key("federation.blocked_domains")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Whether the public domain is a development host
    pub fn is_local_domain(&self) -> bool {
        is_local_server_domain(&self.server.domain)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_KEY_BITS: usize = 1024;

        if self.federation.request_timeout_secs == 0 {
            return Err(crate::error::AppError::Config(
                "federation.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.federation.accepted_content_types.is_empty() {
            return Err(crate::error::AppError::Config(
                "federation.accepted_content_types must not be empty".to_string(),
            ));
        }

        if self.federation.key_bits < MIN_KEY_BITS {
            return Err(crate::error::AppError::Config(format!(
                "federation.key_bits must be at least {}",
                MIN_KEY_BITS
            )));
        }

        if self.emoji.refresh_interval_secs == 0 {
            return Err(crate::error::AppError::Config(
                "emoji.refresh_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.is_local_domain() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Serving a local development domain"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
