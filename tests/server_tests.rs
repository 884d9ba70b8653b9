mod common;

use reqwest::StatusCode;

use common::{sorted, TestServer, MAX_UPLOAD};
use vaultsync::sync::{hash_bytes, RemoteStore};

fn files_url(server: &TestServer, path: &str) -> String {
    format!("{}/api/files/{}", server.url, path)
}

#[tokio::test]
async fn test_token_required_when_configured() {
    let server = TestServer::start(Some("s3cret"), true).await;
    let client = reqwest::Client::new();

    let anonymous = client.get(format!("{}/api/files", server.url)).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let wrong = client
        .get(format!("{}/api/tombstones", server.url))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = client
        .get(format!("{}/api/files", server.url))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    // The transport surfaces a rejected token as a transport error
    let err = server.transport().list_files().await.unwrap_err();
    assert!(matches!(err, vaultsync::Error::Transport { .. }));
    assert!(server.transport_with_token(Some("s3cret")).list_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_put_get_delete() {
    let server = TestServer::private().await;
    let client = reqwest::Client::new();

    let put = client
        .put(files_url(&server, "notes/day one.md"))
        .body("# Day one")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::OK);
    assert_eq!(server.read("notes/day one.md"), b"# Day one");

    let get = client.get(files_url(&server, "notes/day%20one.md")).send().await.unwrap();
    assert_eq!(get.status(), StatusCode::OK);
    assert_eq!(get.bytes().await.unwrap().as_ref(), b"# Day one");

    let records = server.transport().list_files().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "notes/day one.md");
    assert_eq!(records[0].hash, hash_bytes(b"# Day one"));
    assert_eq!(records[0].size, 9);

    let delete = client.delete(files_url(&server, "notes/day one.md")).send().await.unwrap();
    assert_eq!(delete.status(), StatusCode::OK);
    assert!(server.paths().is_empty());
    assert!(!server.file("notes").exists(), "empty directory pruned");

    let tombstones = server.transport().list_tombstones().await.unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].path, "notes/day one.md");
}

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let server = TestServer::private().await;
    let client = reqwest::Client::new();

    let get = client.get(files_url(&server, "nope.md")).send().await.unwrap();
    assert_eq!(get.status(), StatusCode::NOT_FOUND);

    let delete = client.delete(files_url(&server, "nope.md")).send().await.unwrap();
    assert_eq!(delete.status(), StatusCode::NOT_FOUND);

    let err = server.transport().delete("nope.md").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_reserved_and_escaping_paths_rejected() {
    let server = TestServer::private().await;
    let client = reqwest::Client::new();

    let reserved = client
        .put(files_url(&server, ".tombstones.json"))
        .body("[]")
        .send()
        .await
        .unwrap();
    assert_eq!(reserved.status(), StatusCode::BAD_REQUEST);

    let escaping = client
        .put(files_url(&server, "..%2Foutside.md"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(escaping.status(), StatusCode::BAD_REQUEST);
    assert!(server.paths().is_empty());
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let server = TestServer::private().await;
    let client = reqwest::Client::new();

    let resp = client
        .put(files_url(&server, "huge.png"))
        .body(vec![0u8; MAX_UPLOAD + 1])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(server.paths().is_empty());
}

#[tokio::test]
async fn test_publish_store_keeps_no_tombstones() {
    let server = TestServer::publish().await;
    server.put("post.md", b"hello");
    server.put("img/a.png", b"a");

    server.transport().delete("post.md").await.unwrap();

    assert_eq!(sorted(server.paths()), vec!["img/a.png"]);
    assert!(server.transport().list_tombstones().await.unwrap().is_empty());
}
