//! Wire contract of the local API: failures still answer HTTP 200.

mod common;

use std::{sync::Arc, time::Duration};

use common::Fixture;
use gamedock::api::{router, ApiState};
use gamedock::catalog::CatalogClient;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Notify};

async fn serve(fx: &Fixture) -> String {
    let (library, _task) = fx.start();
    let state = ApiState {
        library,
        catalog: CatalogClient::new(Duration::from_secs(1), None, None).unwrap(),
        shutdown: Arc::new(Notify::new()),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

async fn post_raw(base: &str, route: &str, content_type: &str, body: &str) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{base}{route}"))
        .header("content-type", content_type)
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn malformed_bodies_answer_200_with_a_structured_error() {
    let fx = Fixture::new();
    fx.seed(json!({ "games": [{ "id": 1, "name": "Doom", "path": fx.exe }] }));
    let base = serve(&fx).await;

    let cases = [
        ("/api/games/launch", "application/json", "{ not json", "ERR_INVALID_LAUNCH"),
        ("/api/games/order", "application/json", r#"{"ids": "1,2"}"#, "ERR_UNKNOWN"),
        ("/api/steam/import", "application/json", r#"{"games": 5}"#, "ERR_IMPORT_FAIL"),
        ("/api/import", "text/plain", "backup.json", "ERR_IMPORT_FAIL"),
        ("/api/games/1/cover/url", "application/json", r#"{"url": 3}"#, "ERR_IMAGE_DOWNLOAD_FAIL"),
        ("/api/settings/always-on-top", "application/json", r#"{"enabled": "yes"}"#, "ERR_UNKNOWN"),
        ("/api/games", "application/json", "[", "ERR_UNKNOWN"),
    ];
    for (route, content_type, body, code) in cases {
        let (status, reply) = post_raw(&base, route, content_type, body).await;
        assert_eq!(status, 200, "{route}");
        assert_eq!(reply["success"], json!(false), "{route}");
        assert_eq!(reply["error"]["code"], json!(code), "{route}");
    }

    let (status, reply) = post_raw(&base, "/api/data", "application/json", "{").await;
    assert_eq!(status, 200);
    assert_eq!(reply, json!({ "success": false }));

    // Nothing above touched the library.
    assert_eq!(fx.on_disk()["games"][0]["name"], json!("Doom"));
    assert_eq!(fx.on_disk()["settings"]["alwaysOnTop"], json!(false));
}

#[tokio::test]
async fn well_formed_bodies_still_reach_the_library() {
    let fx = Fixture::new();
    fx.seed(json!({ "games": [
        { "id": 1, "name": "A", "path": fx.exe },
        { "id": 2, "name": "B", "path": fx.exe },
    ] }));
    let base = serve(&fx).await;

    let (status, reply) =
        post_raw(&base, "/api/games/order", "application/json", r#"{"ids": [2, 1]}"#).await;
    assert_eq!(status, 200);
    assert_eq!(reply["success"], json!(true));
    let on_disk = fx.on_disk();
    let rank = |id: u64| {
        on_disk["games"]
            .as_array()
            .unwrap()
            .iter()
            .find(|game| game["id"] == json!(id))
            .unwrap()["sortOrder"]
            .clone()
    };
    assert_eq!(rank(2), json!(0));
    assert_eq!(rank(1), json!(1));
}
