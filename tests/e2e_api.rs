//! E2E tests for the resolver HTTP API

mod common;

use chrono::Utc;
use common::{MockResponse, TestServer};
use farfetch::data::{EntityId, Emoji};
use reqwest::StatusCode;
use serde_json::{Value, json};

#[tokio::test]
async fn test_resolve_post_endpoint() {
    let server = TestServer::new().await;
    let ctx = &server.context;
    let actor = ctx.serve_actor("/users/alice", None);
    let uri = ctx.serve_note("/notes/1", &actor, "<p>Hello <b>world</b></p>");

    let response = server
        .client
        .get(server.url("/api/v1/resolve/post"))
        .query(&[("uri", uri.as_str())])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["uri"], uri);
    assert_eq!(body["type"], "Note");
    assert_eq!(body["content"], "<p>Hello <b>world</b></p>");
    assert_eq!(body["visibility"], "public");
    assert_eq!(body["tags"], json!([{"name": "rust"}]));
    assert_eq!(body["deleted"], false);

    let account_id = body["account_id"].as_str().unwrap();
    let author = server.state().db.get_identity(account_id).await.unwrap().unwrap();
    assert_eq!(author.actor_uri, actor);
}

#[tokio::test]
async fn test_resolve_post_without_fetch_is_404() {
    let server = TestServer::new().await;
    let ctx = &server.context;
    let actor = ctx.serve_actor("/users/alice", None);
    let uri = ctx.serve_note("/notes/1", &actor, "hello");

    let response = server
        .client
        .get(server.url("/api/v1/resolve/post"))
        .query(&[("uri", uri.as_str()), ("fetch", "false")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
    assert_eq!(ctx.remote.total_hits(), 0);
}

#[tokio::test]
async fn test_resolve_post_requires_uri() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/api/v1/resolve/post"))
        .query(&[("uri", "  ")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unsupported_verb_is_405_with_allow() {
    let server = TestServer::new().await;

    let response = server
        .client
        .delete(server.url("/api/v1/resolve/post"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        response.headers().get("allow").unwrap().to_str().unwrap(),
        "GET, POST"
    );
}

#[tokio::test]
async fn test_refresh_post_endpoint() {
    let server = TestServer::new().await;
    let ctx = &server.context;
    let actor = ctx.serve_actor("/users/alice", None);
    let uri = ctx.serve_note("/notes/1", &actor, "before");
    ctx.state.resolver.resolve(&uri, true).await.unwrap();

    ctx.serve_note("/notes/1", &actor, "after");
    let response = server
        .client
        .post(server.url("/api/v1/resolve/post"))
        .json(&json!({ "uri": uri }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"], "after");

    ctx.remote.serve("/notes/1", MockResponse::status(410));
    let response = server
        .client
        .post(server.url("/api/v1/resolve/post"))
        .json(&json!({ "uri": uri }))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["deleted"], true);
}

#[tokio::test]
async fn test_resolve_actor_endpoint() {
    let server = TestServer::new().await;
    let ctx = &server.context;
    let actor = ctx.serve_actor("/users/carol", Some("carol"));

    let response = server
        .client
        .get(server.url("/api/v1/resolve/actor"))
        .query(&[("uri", actor.as_str())])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["uri"], actor);
    assert_eq!(body["acct"], "carol@127.0.0.1");
    assert_eq!(body["inbox"], format!("{}/inbox", actor));
    assert_eq!(body["local"], false);

    let response = server
        .client
        .get(server.url("/api/v1/resolve/actor"))
        .query(&[("uri", "carol@127.0.0.1"), ("fetch", "false")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let by_handle: Value = response.json().await.unwrap();
    assert_eq!(by_handle["id"], body["id"]);
}

#[tokio::test]
async fn test_resolve_actor_with_bad_handle_is_422() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/api/v1/resolve/actor"))
        .query(&[("uri", "not-a-handle")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_custom_emojis_lists_local_emoji() {
    let server = TestServer::new().await;
    server
        .state()
        .db
        .insert_emoji(&Emoji {
            id: EntityId::new().0,
            shortcode: "blobcat".to_string(),
            domain: None,
            local: true,
            image_url: "https://local.example/emoji/blobcat.png".to_string(),
            visible_in_picker: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let response = server
        .client
        .get(server.url("/api/v1/custom_emojis"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!([{
            "shortcode": "blobcat",
            "url": "https://local.example/emoji/blobcat.png",
            "static_url": "https://local.example/emoji/blobcat.png",
            "visible_in_picker": true
        }])
    );
}
