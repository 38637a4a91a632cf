//! API Integration Tests
//!
//! Tests the HTTP API endpoints with a real database.
//!
//! Tests are serialized because they share a global test pool.
//!
//! Note: The `more-di` DI framework doesn't support injecting custom pools.
//! We work around this by using `DatabaseConnection::set_shared_pool()` to set
//! a global pool that the DI-created DatabaseConnection will use.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chat_store::{
    api,
    core::services::{MyChatService, MyTodoService, MyUserService},
    infrastructure::database::DatabaseConnection,
    infrastructure::entities::User,
    infrastructure::repositories::{DbChatRepository, DbTodoRepository, DbUserRepository},
};
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use serde_json::{Value, json};
use serial_test::serial;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, Ordering};
use tower::ServiceExt;

/// Counter for unique test database URIs
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Setup test database with migrations and returns a connection on it
/// Uses in-memory SQLite for test isolation
async fn setup_test_db() -> DatabaseConnection {
    let db_num = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    // Use file URI format with shared cache - each test gets a unique DB
    let db_url = format!("sqlite:file:apitestdb{}?mode=memory&cache=shared", db_num);

    let pool = SqlitePool::connect(&db_url).await.unwrap();
    let connection = DatabaseConnection::from_pool(pool.clone());
    connection.migrate().await.unwrap();

    // Set this pool as the global pool so DI uses it
    DatabaseConnection::set_shared_pool(pool);

    connection
}

/// Clean up after test
fn cleanup_test_db() {
    DatabaseConnection::clear_shared_pool();
}

/// Create test app - uses the global pool set by setup_test_db()
fn create_test_app() -> axum::Router {
    let provider = ServiceCollection::new()
        .add(DatabaseConnection::transient())
        .add(DbUserRepository::scoped())
        .add(DbChatRepository::scoped())
        .add(DbTodoRepository::scoped())
        .add(MyUserService::scoped())
        .add(MyChatService::scoped())
        .add(MyTodoService::scoped())
        .build_provider()
        .unwrap();

    axum::Router::new()
        .nest("/users", api::users::router())
        .nest("/chats", api::chats::router())
        .nest("/messages", api::chats::messages_router())
        .nest("/todos", api::todos::router())
        .with_provider(provider)
}

async fn create_user(db: &DatabaseConnection, email: &str) -> String {
    db.user()
        .create(&User::new("Api User", email))
        .await
        .unwrap()
        .id
}

/// Sends one request and returns the status with the decoded body (`Null` when empty)
async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    user_id: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        request = request.header("X-User-ID", user_id);
    }
    let request = match body {
        Some(body) => request
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        // extractor rejections are plain text
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    (status, json)
}

#[tokio::test]
#[serial]
async fn test_list_chats_empty() {
    let db = setup_test_db().await;
    let user_id = create_user(&db, "empty@example.com").await;
    let app = create_test_app();

    let (status, json) = send(&app, "GET", "/chats", Some(&user_id), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["chats"].as_array().unwrap().len(), 0);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_list_chats_requires_auth() {
    let _db = setup_test_db().await;
    let app = create_test_app();

    let (status, _) = send(&app, "GET", "/chats", None, None).await;

    // Should fail without X-User-ID header
    assert_eq!(status, StatusCode::BAD_REQUEST);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_create_chat_for_unknown_user() {
    let _db = setup_test_db().await;
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/chats",
        Some("nobody"),
        Some(json!({"title": "orphan"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("foreign key"));

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_opening_message_names_chat() {
    let db = setup_test_db().await;
    let user_id = create_user(&db, "opener@example.com").await;
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/chats",
        Some(&user_id),
        Some(json!({"message": [{"type": "text", "text": "Plan the release\nwith details"}]})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["chat"]["title"], "Plan the release");
    assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    assert_eq!(json["messages"][0]["role"], "USER");

    let (status, json) = send(&app, "GET", "/chats", Some(&user_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let chats = json["chats"].as_array().unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0]["title"], "Plan the release");

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_get_messages_nonexistent_chat() {
    let db = setup_test_db().await;
    let user_id = create_user(&db, "lost@example.com").await;
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "GET",
        "/chats/does-not-exist/messages",
        Some(&user_id),
        None,
    )
    .await;

    // A chat the user cannot see lists no messages rather than failing
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["messages"].as_array().unwrap().len(), 0);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_chat_is_private_to_owner() {
    let db = setup_test_db().await;
    let owner = create_user(&db, "owner@example.com").await;
    let other = create_user(&db, "other@example.com").await;
    let app = create_test_app();

    let (_, json) = send(
        &app,
        "POST",
        "/chats",
        Some(&owner),
        Some(json!({"title": "secret", "message": "hello"})),
    )
    .await;
    let chat_id = json["chat"]["id"].as_str().unwrap().to_owned();
    let messages_uri = format!("/chats/{chat_id}/messages");

    let (status, json) = send(&app, "GET", &messages_uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["messages"].as_array().unwrap().len(), 0);

    let (status, _) = send(
        &app,
        "POST",
        &messages_uri,
        Some(&other),
        Some(json!({"parts": "intrusion"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", &format!("/chats/{chat_id}"), Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(&app, "GET", &messages_uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    assert_eq!(json["messages"][0]["parts"], "hello");

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_messages_with_attachments_and_null_parts() {
    let db = setup_test_db().await;
    let user_id = create_user(&db, "files@example.com").await;
    let app = create_test_app();

    let (_, json) = send(
        &app,
        "POST",
        "/chats",
        Some(&user_id),
        Some(json!({"title": "files"})),
    )
    .await;
    let chat_id = json["chat"]["id"].as_str().unwrap().to_owned();
    let messages_uri = format!("/chats/{chat_id}/messages");

    let (status, json) = send(
        &app,
        "POST",
        &messages_uri,
        Some(&user_id),
        Some(json!({
            "parts": [{"type": "text", "text": "two files"}],
            "attachments": [
                {"url": "https://files.example.com/a.png", "name": "a.png", "content_type": "image/png"},
                {"url": "https://files.example.com/b.pdf", "name": "b.pdf", "content_type": "application/pdf"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["attachments"].as_array().unwrap().len(), 2);
    let with_files = json["id"].as_str().unwrap().to_owned();

    // explicit null is kept as JSON null, a missing field as no value at all
    let (status, json) = send(
        &app,
        "POST",
        &messages_uri,
        Some(&user_id),
        Some(json!({"role": "ASSISTANT", "parts": null})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(json.as_object().unwrap().contains_key("parts"));
    assert_eq!(json["parts"], Value::Null);

    let (status, json) = send(
        &app,
        "POST",
        &messages_uri,
        Some(&user_id),
        Some(json!({"role": "ASSISTANT"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!json.as_object().unwrap().contains_key("parts"));

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/messages/{with_files}"),
        Some(&user_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = send(&app, "GET", &messages_uri, Some(&user_id), None).await;
    let messages = json["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(
        messages
            .iter()
            .all(|message| message["attachments"].as_array().unwrap().is_empty())
    );

    let attachments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attachments")
        .fetch_one(&*db)
        .await
        .unwrap();
    assert_eq!(attachments, 0);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_todo_lifecycle() {
    let db = setup_test_db().await;
    let user_id = create_user(&db, "todo@example.com").await;
    let app = create_test_app();

    let (status, _) = send(
        &app,
        "POST",
        "/todos",
        Some(&user_id),
        Some(json!({"title": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut ids = Vec::new();
    for title in ["write tests", "ship", "celebrate"] {
        let (status, json) = send(
            &app,
            "POST",
            "/todos",
            Some(&user_id),
            Some(json!({"title": title})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["status"], "PENDING");
        ids.push(json["id"].as_str().unwrap().to_owned());
    }

    let (status, json) = send(
        &app,
        "PATCH",
        &format!("/todos/{}", ids[0]),
        Some(&user_id),
        Some(json!({"status": "FINISHED"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["completed"], true);
    assert!(json["done_at"].is_string());

    let (status, json) = send(
        &app,
        "PATCH",
        &format!("/todos/{}", ids[1]),
        Some(&user_id),
        Some(json!({"status": "CANCELLED"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["cancelled_at"].is_string());
    assert_eq!(json["done_at"], Value::Null);

    let (status, json) = send(&app, "GET", "/todos?status=FINISHED", Some(&user_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let finished = json["todos"].as_array().unwrap();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0]["title"], "write tests");

    let (status, json) = send(&app, "GET", "/todos/stats", Some(&user_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({"pending": 1, "finished": 1, "cancelled": 1})
    );

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/todos/{}", ids[2]),
        Some("someone-else"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/todos/{}", ids[2]),
        Some(&user_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = send(&app, "GET", "/todos", Some(&user_id), None).await;
    assert_eq!(json["todos"].as_array().unwrap().len(), 2);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_user_registration_and_profile() {
    let _db = setup_test_db().await;
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/users",
        None,
        Some(json!({"name": "Ada", "email": " Ada@Example.com "})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["email"], "ada@example.com");
    let user_id = json["id"].as_str().unwrap().to_owned();

    let (status, _) = send(
        &app,
        "POST",
        "/users",
        None,
        Some(json!({"name": "Ada again", "email": "ada@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "POST",
        "/users",
        None,
        Some(json!({"name": "Nobody", "email": "not-an-email"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &app,
        "PATCH",
        "/users/me",
        Some(&user_id),
        Some(json!({"bio": "Analytical engine enthusiast", "image": null})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bio"], "Analytical engine enthusiast");
    assert_eq!(json["name"], "Ada");

    let (status, json) = send(&app, "GET", "/users/me", Some(&user_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bio"], "Analytical engine enthusiast");

    send(
        &app,
        "POST",
        "/todos",
        Some(&user_id),
        Some(json!({"title": "outlive the account?"})),
    )
    .await;

    let (status, _) = send(&app, "DELETE", "/users/me", Some(&user_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "GET", "/users/me", Some(&user_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = send(&app, "GET", "/todos", Some(&user_id), None).await;
    assert_eq!(json["todos"].as_array().unwrap().len(), 0);

    cleanup_test_db();
}
