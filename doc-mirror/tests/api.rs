use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use doc_mirror::api::{router, AppState};
use doc_mirror_core::auth::{Claims, Hs256Verifier};
use doc_mirror_core::error::RemoteError;
use doc_mirror_core::events::EventBus;
use doc_mirror_core::model::UserRecord;
use doc_mirror_core::remote::memory::RemoteOp;
use doc_mirror_core::remote::MemoryRemoteStore;
use doc_mirror_core::storage::{MemoryStore, MirrorStore};
use doc_mirror_core::{DocumentManager, MirrorConfig, Role};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

const SECRET: &str = "test-secret";

struct TestApp {
    app: Router,
    remote: Arc<MemoryRemoteStore>,
}

async fn test_app_with(config: MirrorConfig, header_auth: bool) -> TestApp {
    let remote = Arc::new(MemoryRemoteStore::new(config.root_folder_key.clone()));
    let store = Arc::new(MemoryStore::new());
    for (id, role) in [("alice", Role::Member), ("bob", Role::Member), ("ops", Role::Admin)] {
        store
            .upsert_user(UserRecord {
                id: id.into(),
                email: Some(format!("{}@example.com", id)),
                role,
            })
            .await
            .unwrap();
    }
    let manager = Arc::new(DocumentManager::new(
        config,
        remote.clone(),
        store,
        EventBus::new(),
    ));
    let state = AppState {
        manager,
        verifier: Arc::new(Hs256Verifier::new(SECRET.into())),
        header_auth,
    };
    TestApp {
        app: router(state),
        remote,
    }
}

async fn test_app() -> TestApp {
    test_app_with(MirrorConfig::default(), true).await
}

fn bearer(sub: &str, role: Role) -> String {
    let claims = Claims {
        sub: sub.into(),
        role,
        exp: None,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        req = req.header("X-User-Id", user);
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    send(app, req).await
}

async fn create_folder(app: &Router, user: &str, name: &str) -> String {
    let (status, body) = call(app, "POST", "/folders", Some(user), Some(json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_endpoint() {
    let t = test_app().await;
    let resp = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn missing_session_is_unauthorized() {
    let t = test_app().await;
    let (status, body) = call(&t.app, "GET", "/folders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["kind"], json!("unauthorized"));
}

#[tokio::test]
async fn header_identity_ignored_when_disabled() {
    let t = test_app_with(MirrorConfig::default(), false).await;
    let (status, _) = call(&t.app, "GET", "/folders", Some("alice"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/folders")
        .header("Authorization", bearer("alice", Role::Member))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

#[tokio::test]
async fn invalid_bearer_does_not_fall_back_to_header() {
    let t = test_app().await;
    let req = Request::builder()
        .uri("/folders")
        .header("Authorization", "Bearer not-a-token")
        .header("X-User-Id", "alice")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_upload_and_list() {
    let t = test_app().await;
    let folder = create_folder(&t.app, "alice", "Reports").await;

    let req = Request::builder()
        .method("POST")
        .uri(format!("/files?name=Q1.pdf&parent_id={}", folder))
        .header("X-User-Id", "alice")
        .header("content-type", "application/pdf")
        .body(Body::from("%PDF-1.7"))
        .unwrap();
    let (status, body) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["mime_type"], json!("application/pdf"));
    assert_eq!(body["data"]["size_bytes"], json!(8));
    assert_eq!(body["data"]["owner_id"], json!("alice"));

    let (status, body) = call(&t.app, "GET", &format!("/folders/{}", folder), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["document"]["name"], json!("Q1.pdf"));

    let (_, body) = call(
        &t.app,
        "GET",
        &format!("/folders/{}?q=q2", folder),
        Some("alice"),
        None,
    )
    .await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn validation_errors_are_keyed_by_field() {
    let t = test_app().await;
    let (status, body) = call(&t.app, "POST", "/folders", Some("alice"), Some(json!({ "name": "  " }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], json!("validation_error"));
    assert!(body["error"]["name"].is_array());
}

#[tokio::test]
async fn oversized_upload_is_rejected_before_the_remote() {
    let config = MirrorConfig {
        max_upload_bytes: 4,
        ..Default::default()
    };
    let t = test_app_with(config, true).await;
    let req = Request::builder()
        .method("POST")
        .uri("/files?name=big.bin")
        .header("X-User-Id", "alice")
        .body(Body::from("12345"))
        .unwrap();
    let (status, body) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
    assert!(body["error"]["file"].is_array());
    assert_eq!(t.remote.calls(RemoteOp::UploadObject), 0);
}

#[tokio::test]
async fn remote_outage_maps_to_bad_gateway() {
    let t = test_app().await;
    t.remote
        .fail(RemoteOp::CreateFolder, RemoteError::Unavailable("503".into()));
    let (status, body) = call(&t.app, "POST", "/folders", Some("alice"), Some(json!({ "name": "X" }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], json!("remote_unavailable"));
}

#[tokio::test]
async fn share_lifecycle_over_http() {
    let t = test_app().await;
    let folder = create_folder(&t.app, "alice", "Reports").await;

    let (status, _) = call(&t.app, "GET", &format!("/folders/{}", folder), Some("bob"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/documents/{}/shares", folder),
        Some("alice"),
        Some(json!({ "grantee_id": "bob", "permission": "edit" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["permission"], json!("edit"));

    let (status, body) = call(
        &t.app,
        "GET",
        &format!("/documents/{}/shares", folder),
        Some("bob"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["grantee_id"], json!("bob"));

    let (_, body) = call(&t.app, "GET", "/shares/incoming", Some("bob"), None).await;
    let incoming = body["data"].as_array().unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0]["document"]["name"], json!("Reports"));

    let (status, body) = call(
        &t.app,
        "PUT",
        &format!("/documents/{}/rename", folder),
        Some("bob"),
        Some(json!({ "name": "Reports 2024" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["name"], json!("Reports 2024"));

    let (status, body) = call(
        &t.app,
        "DELETE",
        &format!("/documents/{}/shares/bob", folder),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["revoked"], json!(true));

    let (status, body) = call(&t.app, "DELETE", &format!("/documents/{}", folder), Some("bob"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], json!("forbidden"));
}

#[tokio::test]
async fn move_and_delete() {
    let t = test_app().await;
    let a = create_folder(&t.app, "alice", "A").await;
    let b = create_folder(&t.app, "alice", "B").await;

    let (status, body) = call(
        &t.app,
        "PUT",
        &format!("/documents/{}/move", b),
        Some("alice"),
        Some(json!({ "new_parent_id": a })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = call(
        &t.app,
        "PUT",
        &format!("/documents/{}/move", a),
        Some("alice"),
        Some(json!({ "new_parent_id": b })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
    assert!(body["error"]["new_parent_id"].is_array());

    let (status, _) = call(&t.app, "DELETE", &format!("/documents/{}", b), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&t.app, "GET", &format!("/documents/{}", b), Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], json!("not_found"));
}

#[tokio::test]
async fn task_links_need_a_task_id() {
    let t = test_app().await;
    let folder = create_folder(&t.app, "alice", "Specs").await;
    let uri = format!("/documents/{}/tasks", folder);

    let (status, _) = call(&t.app, "POST", &uri, Some("alice"), Some(json!({ "task_id": "" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, body) = call(&t.app, "POST", &uri, Some("alice"), Some(json!({ "task_id": "T-1" }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], json!(true));
}

#[tokio::test]
async fn audit_requires_admin_role() {
    let t = test_app().await;
    let folder = create_folder(&t.app, "alice", "Gone soon").await;
    let (_, body) = call(&t.app, "GET", &format!("/documents/{}", folder), Some("alice"), None).await;
    let key = body["data"]["key"].as_str().unwrap().to_string();
    assert!(t.remote.remove_object(&key));

    let (status, _) = call(&t.app, "POST", "/admin/audit", Some("alice"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = Request::builder()
        .method("POST")
        .uri("/admin/audit")
        .header("Authorization", bearer("ops", Role::Admin))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["checked"], json!(1));
    assert_eq!(body["data"]["pruned"].as_array().unwrap().len(), 1);

    // role comes from the user table for header sessions
    let (status, _) = call(&t.app, "POST", "/admin/audit", Some("ops"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_body_is_a_validation_result() {
    let t = test_app().await;
    let (status, body) = call(&t.app, "POST", "/folders", Some("alice"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["kind"], json!("validation_error"));
    assert!(body["error"]["body"].is_array());

    let req = Request::builder()
        .method("POST")
        .uri("/folders")
        .header("X-User-Id", "alice")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!body.to_string().contains("deserialize"));
    assert!(body["error"]["body"].is_array());
}

#[tokio::test]
async fn malformed_id_is_a_validation_result() {
    let t = test_app().await;
    let (status, body) = call(&t.app, "GET", "/documents/not-a-uuid", Some("alice"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], json!("validation_error"));
    assert!(body["error"]["id"].is_array());

    let (status, body) = call(&t.app, "DELETE", "/documents/123/shares/bob", Some("alice"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["id"].is_array());
}

#[tokio::test]
async fn malformed_query_is_a_validation_result() {
    let t = test_app().await;
    let req = Request::builder()
        .method("POST")
        .uri("/files?name=a.txt&parent_id=nope")
        .header("X-User-Id", "alice")
        .body(Body::from("hi"))
        .unwrap();
    let (status, body) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["query"].is_array());

    let req = Request::builder()
        .method("POST")
        .uri("/files")
        .header("X-User-Id", "alice")
        .body(Body::from("hi"))
        .unwrap();
    let (status, body) = send(&t.app, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["name"].is_array());
    assert_eq!(t.remote.calls(RemoteOp::UploadObject), 0);
}
