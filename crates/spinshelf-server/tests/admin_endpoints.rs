use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

use common::{ADMIN, USER_ID};

const TRACK_1: &str = "7GhIk7Il098yCjg4BQjzvb";
const TRACK_2: &str = "0VjIjW4GlUZAMYd2vXMi3b";

async fn history(client: &reqwest::Client, base: &str) -> Value {
    client
        .get(format!("{base}/admin/history"))
        .header("x-admin-identity", ADMIN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn unauthenticated_calls_are_rejected_without_side_effects() {
    let upstream = MockServer::start().await;
    common::mount_token(&upstream).await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/users/{USER_ID}/playlists")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [common::playlist("37i9dQZF1DXcBWIGoYBM5M", "Focus")],
            "next": null,
            "total": 1
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = common::start_server(&common::config_for(&upstream)).await;
    let client = reqwest::Client::new();
    let base = &server.base;

    let resp = client.get(format!("{base}/api/playlists")).send().await.unwrap();
    assert!(resp.status().is_success());

    let resp = client
        .post(format!("{base}/admin/refresh"))
        .json(&json!({ "tag": "playlists" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert!(resp.headers().contains_key("www-authenticate"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let resp = client
        .post(format!("{base}/admin/refresh"))
        .header("x-admin-identity", "someone-else@example.com")
        .json(&json!({ "action": "purge-all" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    for (verb, url) in [
        (reqwest::Method::GET, "/admin/history"),
        (reqwest::Method::DELETE, "/admin/history"),
        (reqwest::Method::GET, "/admin/cache"),
    ] {
        let resp = client
            .request(verb, format!("{base}{url}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401, "{url}");
    }

    assert_eq!(history(&client, base).await["count"], 0);

    let stats: Value = client
        .get(format!("{base}/admin/cache"))
        .header("x-admin-identity", ADMIN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["entries"], 1);
    assert_eq!(stats["evictions"], 0);

    // Still served from cache; the upstream mock allows a single call.
    let body: Value = client
        .get(format!("{base}/api/playlists"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["items"][0]["name"], "Focus");

    server.stop().await;
}

#[tokio::test]
async fn admin_disabled_without_identity() {
    let upstream = MockServer::start().await;
    let mut cfg = common::config_for(&upstream);
    cfg.admin.identity = String::new();
    let server = common::start_server(&cfg).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/admin/history", server.base))
        .header("x-admin-identity", "")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    server.stop().await;
}

#[tokio::test]
async fn refresh_validates_body() {
    let upstream = MockServer::start().await;
    let server = common::start_server(&common::config_for(&upstream)).await;
    let client = reqwest::Client::new();
    let base = &server.base;

    for body in [
        json!({ "tag": "albums" }),
        json!({ "tag": "all" }),
        json!({ "action": "nuke" }),
        json!({}),
    ] {
        let resp = client
            .post(format!("{base}/admin/refresh"))
            .header("x-admin-identity", ADMIN)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{body}");
    }

    let resp = client
        .post(format!("{base}/admin/refresh"))
        .header("x-admin-identity", ADMIN)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert_eq!(history(&client, base).await["count"], 0);
    server.stop().await;
}

#[tokio::test]
async fn refresh_and_purge_are_recorded() {
    let upstream = MockServer::start().await;
    let server = common::start_server(&common::config_for(&upstream)).await;
    let client = reqwest::Client::new();
    let base = &server.base;

    let resp = client
        .post(format!("{base}/admin/refresh"))
        .header("x-admin-identity", ADMIN)
        .json(&json!({ "tag": "playlists" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["success"], true);
    assert_eq!(ack["tag"], "playlists");
    assert!(ack["timestamp"].is_string());

    let resp = client
        .post(format!("{base}/admin/refresh"))
        .header("x-admin-identity", ADMIN)
        .json(&json!({ "action": "purge-all" }))
        .send()
        .await
        .unwrap();
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["success"], true);
    assert_eq!(ack["tags"].as_array().unwrap().len(), 6);

    let log = history(&client, base).await;
    assert_eq!(log["count"], 2);
    let events = log["history"].as_array().unwrap();
    assert_eq!(events[0]["tag"], "all");
    assert_eq!(events[0]["action"], "purge-all");
    assert_eq!(events[1]["tag"], "playlists");
    assert_eq!(events[1]["action"], "refresh");
    assert_ne!(events[0]["id"], events[1]["id"]);

    server.stop().await;
}

#[tokio::test]
async fn history_record_list_and_clear() {
    let upstream = MockServer::start().await;
    let server = common::start_server(&common::config_for(&upstream)).await;
    let client = reqwest::Client::new();
    let base = &server.base;

    let resp = client
        .post(format!("{base}/admin/history"))
        .header("x-admin-identity", ADMIN)
        .json(&json!({ "tag": "tracks", "action": "refresh" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["event"]["tag"], "tracks");

    let resp = client
        .post(format!("{base}/admin/history"))
        .header("x-admin-identity", ADMIN)
        .json(&json!({ "tag": "  ", "action": "refresh" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert_eq!(history(&client, base).await["count"], 1);

    let resp = client
        .delete(format!("{base}/admin/history"))
        .header("x-admin-identity", ADMIN)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "cleared 1 history events");

    assert_eq!(history(&client, base).await["count"], 0);
    server.stop().await;
}

#[tokio::test]
async fn refresh_drops_cached_entries() {
    let upstream = MockServer::start().await;
    common::mount_token(&upstream).await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/users/{USER_ID}/playlists")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [common::playlist("37i9dQZF1DXcBWIGoYBM5M", "Focus")],
            "next": null,
            "total": 1
        })))
        .expect(2)
        .mount(&upstream)
        .await;

    let server = common::start_server(&common::config_for(&upstream)).await;
    let client = reqwest::Client::new();
    let base = &server.base;

    for _ in 0..2 {
        let body: Value = client
            .get(format!("{base}/api/playlists"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["count"], 1);
    }

    let stats: Value = client
        .get(format!("{base}/admin/cache"))
        .header("x-admin-identity", ADMIN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["entries"], 1);
    assert_eq!(stats["hits"], 1);

    let ack: Value = client
        .post(format!("{base}/admin/refresh"))
        .header("x-admin-identity", ADMIN)
        .json(&json!({ "tag": format!("user-playlists:{USER_ID}") }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ack["removed"], 1);

    let resp = client
        .get(format!("{base}/api/playlists"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    server.stop().await;
}

#[tokio::test]
async fn spotify_token_refresh_drops_credential() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access", "expires_in": 3600
        })))
        .expect(2)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tracks"))
        .and(query_param("ids", TRACK_1))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "tracks": [common::track(TRACK_1)] })),
        )
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tracks"))
        .and(query_param("ids", TRACK_2))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "tracks": [common::track(TRACK_2)] })),
        )
        .mount(&upstream)
        .await;

    let server = common::start_server(&common::config_for(&upstream)).await;
    let client = reqwest::Client::new();
    let base = &server.base;

    let resp = client
        .get(format!("{base}/api/tracks?ids={TRACK_1}"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let ready: Value = client
        .get(format!("{base}/readyz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["credential_cached"], true);

    let resp = client
        .post(format!("{base}/admin/refresh"))
        .header("x-admin-identity", ADMIN)
        .json(&json!({ "tag": "spotify-token" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let ready: Value = client
        .get(format!("{base}/readyz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["credential_cached"], false);

    // The next upstream call exchanges a new credential.
    let resp = client
        .get(format!("{base}/api/tracks?ids={TRACK_2}"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    server.stop().await;
}
