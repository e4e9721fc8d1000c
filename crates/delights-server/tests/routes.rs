use std::path::Path;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use delights_server::router;
use tower::ServiceExt;

fn site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>Divine Delights</h1>").unwrap();
    std::fs::write(dir.path().join("sw.js"), "// worker").unwrap();
    std::fs::create_dir(dir.path().join("styles")).unwrap();
    std::fs::write(dir.path().join("styles/main.css"), "body{}").unwrap();
    dir
}

async fn get(dir: &Path, uri: &str) -> Response {
    router(dir, "/sw.js")
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn products_api_lists_featured_products() {
    let dir = site();
    let response = get(dir.path(), "/api/products").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["status"], "success");
    let ids: Vec<&str> = json["data"]["products"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["prod101", "prod102", "prod104"]);
}

#[tokio::test]
async fn root_serves_index() {
    let dir = site();
    let response = get(dir.path(), "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "<h1>Divine Delights</h1>");
}

#[tokio::test]
async fn static_files_are_served() {
    let dir = site();
    let response = get(dir.path(), "/styles/main.css").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "body{}");
}

#[tokio::test]
async fn unknown_path_is_404() {
    let dir = site();
    let response = get(dir.path(), "/images/missing.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn worker_script_headers() {
    let dir = site();
    let response = get(dir.path(), "/sw.js").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["service-worker-allowed"], "/");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(body_string(response).await, "// worker");
}
