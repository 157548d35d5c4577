//! Common test utilities for E2E tests
//!
//! `MockRemote` plays a remote ActivityPub server: canned responses per
//! path and a hit counter per path. `TestContext` wires a real database and
//! resolver against it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    response::Response,
};
use farfetch::federation::ContentNegotiator;
use farfetch::{AppState, config};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Canned response for one path
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub location: Option<String>,
    /// Held back this long before answering
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn activity_json(document: &Value) -> Self {
        Self {
            status: 200,
            content_type: "application/activity+json".to_string(),
            body: serde_json::to_vec(document).unwrap(),
            location: None,
            delay: None,
        }
    }

    pub fn with_content_type(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            body: body.into(),
            location: None,
            delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: b"{}".to_vec(),
            location: None,
            delay: None,
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self {
            status: 301,
            content_type: "text/plain".to_string(),
            body: Vec::new(),
            location: Some(location.to_string()),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct MockState {
    responses: Mutex<HashMap<String, MockResponse>>,
    hits: Mutex<HashMap<String, usize>>,
}

/// In-process remote server
pub struct MockRemote {
    addr: String,
    state: Arc<MockState>,
}

impl MockRemote {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(serve).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            state,
        }
    }

    /// Scheme and authority, e.g. `http://127.0.0.1:4321`
    pub fn base_url(&self) -> &str {
        &self.addr
    }

    /// Absolute URI for `path` on this server
    pub fn uri(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn serve(&self, path: &str, response: MockResponse) {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    pub fn serve_json(&self, path: &str, document: &Value) {
        self.serve(path, MockResponse::activity_json(document));
    }

    /// Requests received for `path`
    pub fn hits(&self, path: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().values().sum()
    }
}

async fn serve(State(state): State<Arc<MockState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    *state.hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    let canned = state.responses.lock().unwrap().get(&path).cloned();
    let Some(canned) = canned else {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap();
    };

    if let Some(delay) = canned.delay {
        tokio::time::sleep(delay).await;
    }

    let mut builder = Response::builder()
        .status(canned.status)
        .header(header::CONTENT_TYPE, canned.content_type);
    if let Some(location) = canned.location {
        builder = builder.header(header::LOCATION, location);
    }
    builder.body(Body::from(canned.body)).unwrap()
}

// =============================================================================
// Documents
// =============================================================================

pub fn person(id: &str, username: Option<&str>) -> Value {
    let mut document = json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "id": id,
        "type": "Person",
        "inbox": format!("{}/inbox", id),
        "outbox": format!("{}/outbox", id),
        "followers": format!("{}/followers", id),
        "publicKey": {
            "id": format!("{}#main-key", id),
            "owner": id,
            "publicKeyPem": "-----BEGIN PUBLIC KEY-----\nTEST\n-----END PUBLIC KEY-----\n"
        }
    });
    if let Some(username) = username {
        document["preferredUsername"] = json!(username);
    }
    document
}

pub fn note(id: &str, actor: &str, content: &str) -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": id,
        "type": "Note",
        "attributedTo": actor,
        "content": content,
        "to": [PUBLIC],
        "cc": [format!("{}/followers", actor)],
        "published": "2024-01-01T12:00:00Z",
        "tag": [
            {"type": "Hashtag", "name": "#Rust"}
        ]
    })
}

// =============================================================================
// Context
// =============================================================================

pub fn test_config(temp_dir: &TempDir) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            domain: "local.example".to_string(),
            protocol: "https".to_string(),
        },
        database: config::DatabaseConfig {
            path: temp_dir.path().join("test.db"),
            max_connections: 8,
        },
        federation: config::FederationConfig {
            ssrf_protection: false,
            key_bits: 1024,
            ..config::FederationConfig::default()
        },
        emoji: config::EmojiConfig {
            // Reload on every request
            refresh_interval_secs: 0,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Application state wired to a mock remote
pub struct TestContext {
    pub state: AppState,
    pub remote: MockRemote,
    pub _temp_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build with a tweaked configuration
    pub async fn with_config(tweak: impl FnOnce(&mut config::AppConfig)) -> Self {
        let remote = MockRemote::start().await;
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        tweak(&mut config);

        let client = ContentNegotiator::client_builder(&config.federation)
            .no_proxy()
            .build()
            .unwrap();
        let state = AppState::with_http_client(config, client).await.unwrap();

        Self {
            state,
            remote,
            _temp_dir: temp_dir,
        }
    }

    /// Build with every plain-http request sent to the mock remote, so
    /// documents can use real-looking hosts such as `example.com`
    pub async fn proxied() -> Self {
        let remote = MockRemote::start().await;
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let client = ContentNegotiator::client_builder(&config.federation)
            .proxy(reqwest::Proxy::http(remote.base_url()).unwrap())
            .build()
            .unwrap();
        let state = AppState::with_http_client(config, client).await.unwrap();

        Self {
            state,
            remote,
            _temp_dir: temp_dir,
        }
    }

    /// Serve an actor at `path` and return its URI
    pub fn serve_actor(&self, path: &str, username: Option<&str>) -> String {
        let id = self.remote.uri(path);
        self.remote.serve_json(path, &person(&id, username));
        id
    }

    /// Serve a note at `path` by `actor` and return its URI
    pub fn serve_note(&self, path: &str, actor: &str, content: &str) -> String {
        let id = self.remote.uri(path);
        self.remote.serve_json(path, &note(&id, actor, content));
        id
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub context: TestContext,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        farfetch::metrics::init_metrics();
        let context = TestContext::new().await;

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .no_proxy()
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = farfetch::build_router(context.state.clone()).unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            context,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn state(&self) -> &AppState {
        &self.context.state
    }
}
