//! HttpDependencyClient + DataFormatClient against a stub dependency server.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::RwLock;

use dependency_client::{DataFormatClient, HttpDependencyClient};
use stream_api::{DependencyClient, DependencyKind, FormatDefinition, FormatId, StreamError};

#[derive(Default)]
struct Stub {
    documents: RwLock<HashMap<(String, String), serde_json::Value>>,
    gets: AtomicUsize,
    next_id: AtomicUsize,
}

async fn get_document(
    State(stub): State<Arc<Stub>>,
    Path((kind, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    stub.gets.fetch_add(1, Ordering::SeqCst);
    if params.get("group").map(String::as_str) != Some("dev") {
        return Err(StatusCode::BAD_REQUEST);
    }
    stub.documents
        .read()
        .await
        .get(&(kind, id))
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_document(
    State(stub): State<Arc<Stub>>,
    Path(kind): Path<String>,
    Json(document): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let id = format!("{:08x}", stub.next_id.fetch_add(1, Ordering::SeqCst) + 0xa0);
    stub.documents.write().await.insert((kind, id.clone()), document);
    Json(serde_json::json!({ "id": id }))
}

async fn spawn_stub() -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub::default());
    let app = Router::new()
        .route("/api/dependencies/{kind}/{id}", get(get_document))
        .route("/api/dependencies/{kind}", post(put_document))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/api/dependencies"), stub)
}

#[tokio::test]
async fn put_and_get_round_trip_over_http() {
    let (uri, _stub) = spawn_stub().await;
    let client = HttpDependencyClient::new(uri, "dev").unwrap();

    let doc = serde_json::json!({"feeds": [{"name": "", "parameters": ["vCar"]}]});
    let id = client.put(DependencyKind::DataFormat, &doc).await.unwrap();
    assert_eq!(id, FormatId::new("000000a0"));
    assert_eq!(client.get(DependencyKind::DataFormat, &id).await.unwrap(), doc);
}

#[tokio::test]
async fn unknown_hash_is_unresolved() {
    let (uri, _stub) = spawn_stub().await;
    let client = HttpDependencyClient::new(uri, "dev").unwrap();

    let err = client
        .get(DependencyKind::DataFormat, &FormatId::new("deadbeef"))
        .await
        .unwrap_err();
    match err {
        StreamError::UnresolvedFormat { id, reason } => {
            assert_eq!(id, "deadbeef");
            assert!(reason.contains("unknown dataformat"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn wrong_group_is_reported_with_status() {
    let (uri, _stub) = spawn_stub().await;
    let client = HttpDependencyClient::new(uri, "prod").unwrap();

    let err = client
        .get(DependencyKind::DataFormat, &FormatId::new("deadbeef"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("400"), "{err}");
}

#[tokio::test]
async fn resolver_fetches_each_hash_once() {
    let (uri, stub) = spawn_stub().await;
    let http = Arc::new(HttpDependencyClient::new(uri, "dev").unwrap());

    let def = FormatDefinition::single_feed("", vec!["nEngine".into(), "vCar".into()]);
    let id = http
        .put(DependencyKind::DataFormat, &serde_json::to_value(&def).unwrap())
        .await
        .unwrap();

    let formats = DataFormatClient::new(http);
    for _ in 0..3 {
        assert_eq!(*formats.resolve(&id).await.unwrap(), def);
    }
    assert_eq!(stub.gets.load(Ordering::SeqCst), 1);
}
