//! Database and schema tests
//!
//! Tests SQLite migrations, entity storage, and schema constraints

use chat_store::infrastructure::database::DatabaseConnection;
use chat_store::infrastructure::entities::{
    Account, Attachment, Authenticator, Chat, Message, MessageRole, Session, Todo, TodoStatus,
    User, VerificationToken,
};
use chat_store::infrastructure::error::StoreError;
use chat_store::infrastructure::query::{
    Changes, Filter, FindManyArgs, JsonNullFilter, NullableJson, OrderBy, UniqueWhere,
};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;

/// Setup test database with migrations
async fn setup_test_db() -> DatabaseConnection {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    let connection = DatabaseConnection::from_pool(pool);
    connection.migrate().await.unwrap();
    connection
}

async fn create_user(db: &DatabaseConnection, email: &str) -> User {
    db.user().create(&User::new("Test User", email)).await.unwrap()
}

fn authenticator(user_id: &str, credential_id: &str) -> Authenticator {
    Authenticator {
        credential_id: credential_id.to_owned(),
        user_id: user_id.to_owned(),
        provider_account_id: "passkey-account".to_owned(),
        credential_public_key: "pk".to_owned(),
        counter: 0,
        credential_device_type: "singleDevice".to_owned(),
        credential_backed_up: false,
        transports: Some("internal".to_owned()),
    }
}

#[tokio::test]
async fn test_database_migrations_work() {
    let db = setup_test_db().await;

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(&*db)
            .await
            .unwrap();

    for table in [
        "accounts",
        "attachments",
        "authenticators",
        "chats",
        "messages",
        "sessions",
        "todos",
        "users",
        "verification_tokens",
    ] {
        assert!(tables.iter().any(|name| name == table), "missing {table}");
    }
}

#[tokio::test]
async fn test_foreign_keys_are_enforced() {
    let db = setup_test_db().await;

    let err = db
        .chat()
        .create(&Chat::new("no-such-user", None))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ForeignKeyViolation { model: "Chat", .. }));
    assert_eq!(db.chat().count(&Filter::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_email_is_rejected() {
    let db = setup_test_db().await;
    create_user(&db, "dup@example.com").await;

    let err = db
        .user()
        .create(&User::new("Other", "dup@example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::UniqueViolation { model: "User", .. }));
}

#[tokio::test]
async fn test_duplicate_provider_account_is_rejected() {
    let db = setup_test_db().await;
    let alice = create_user(&db, "alice@example.com").await;
    let bob = create_user(&db, "bob@example.com").await;

    db.account()
        .create(&Account::new(&alice.id, "oauth", "github", "gh-1"))
        .await
        .unwrap();
    let err = db
        .account()
        .create(&Account::new(&bob.id, "oauth", "github", "gh-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation { .. }));

    // the same external id at another provider is a different account
    db.account()
        .create(&Account::new(&bob.id, "oauth", "google", "gh-1"))
        .await
        .unwrap();

    let found = db
        .account()
        .find_unique(
            &UniqueWhere::by("provider", "github").and("provider_account_id", "gh-1"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.user_id, alice.id);
    assert_eq!(found.kind, "oauth");
}

#[tokio::test]
async fn test_session_token_lookup() {
    let db = setup_test_db().await;
    let user = create_user(&db, "session@example.com").await;
    let expires = Utc::now() + Duration::days(30);

    db.session()
        .create(&Session::new(&user.id, "token-abc", expires))
        .await
        .unwrap();

    let session = db
        .session()
        .find_unique_or_throw(&UniqueWhere::by("session_token", "token-abc"))
        .await
        .unwrap();
    assert_eq!(session.user_id, user.id);

    let missing = db
        .session()
        .find_unique_or_throw(&UniqueWhere::by("session_token", "nope"))
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_duplicate_session_token_is_rejected() {
    let db = setup_test_db().await;
    let first = create_user(&db, "first@example.com").await;
    let second = create_user(&db, "second@example.com").await;
    let expires = Utc::now() + Duration::days(30);

    db.session()
        .create(&Session::new(&first.id, "shared-token", expires))
        .await
        .unwrap();
    let err = db
        .session()
        .create(&Session::new(&second.id, "shared-token", expires))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::UniqueViolation {
            model: "Session",
            ..
        }
    ));
    assert_eq!(db.session().count(&Filter::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_verification_token_compound_key() {
    let db = setup_test_db().await;
    let expires = Utc::now() + Duration::hours(1);
    let token = |identifier: &str, token: &str| VerificationToken {
        identifier: identifier.to_owned(),
        token: token.to_owned(),
        expires,
    };

    db.verification_token()
        .create(&token("a@example.com", "t1"))
        .await
        .unwrap();
    // same token for a different identifier is fine
    db.verification_token()
        .create(&token("b@example.com", "t1"))
        .await
        .unwrap();
    let err = db
        .verification_token()
        .create(&token("a@example.com", "t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation { .. }));

    // half of the compound key does not select a single row
    let err = db
        .verification_token()
        .find_unique(&UniqueWhere::by("token", "t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidSelector { .. }));

    let consumed = db
        .verification_token()
        .delete(&UniqueWhere::by("token", "t1").and("identifier", "a@example.com"))
        .await
        .unwrap();
    assert_eq!(consumed.identifier, "a@example.com");
    assert_eq!(
        db.verification_token()
            .count(&Filter::default())
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_authenticator_keys_and_counter() {
    let db = setup_test_db().await;
    let user = create_user(&db, "passkey@example.com").await;

    db.authenticator()
        .create(&authenticator(&user.id, "cred-1"))
        .await
        .unwrap();
    let err = db
        .authenticator()
        .create(&authenticator(&user.id, "cred-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation { .. }));

    let selector = UniqueWhere::by("user_id", user.id.as_str()).and("credential_id", "cred-1");
    for _ in 0..3 {
        db.authenticator()
            .update(&selector, Changes::new().increment("counter", 1))
            .await
            .unwrap();
    }
    let stored = db
        .authenticator()
        .find_unique_or_throw(&UniqueWhere::by("credential_id", "cred-1"))
        .await
        .unwrap();
    assert_eq!(stored.counter, 3);
}

#[tokio::test]
async fn test_credential_id_is_unique_across_users() {
    let db = setup_test_db().await;
    let owner = create_user(&db, "owner-key@example.com").await;
    let other = create_user(&db, "other-key@example.com").await;

    db.authenticator()
        .create(&authenticator(&owner.id, "cred-shared"))
        .await
        .unwrap();
    let err = db
        .authenticator()
        .create(&authenticator(&other.id, "cred-shared"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::UniqueViolation {
            model: "Authenticator",
            ..
        }
    ));

    let stored = db
        .authenticator()
        .find_unique_or_throw(&UniqueWhere::by("credential_id", "cred-shared"))
        .await
        .unwrap();
    assert_eq!(stored.user_id, owner.id);
}

#[tokio::test]
async fn test_deleting_message_removes_attachments() {
    let db = setup_test_db().await;
    let user = create_user(&db, "owner@example.com").await;
    let chat = db.chat().create(&Chat::new(&user.id, None)).await.unwrap();
    let message = db
        .message()
        .create(&Message::new(
            &chat.id,
            &user.id,
            MessageRole::User,
            NullableJson::Value(json!([{"type": "text", "text": "see attached"}])),
        ))
        .await
        .unwrap();
    for name in ["a.png", "b.pdf"] {
        db.attachment()
            .create(&Attachment::new(
                &message.id,
                format!("https://files.example.com/{name}"),
                name,
                "application/octet-stream",
            ))
            .await
            .unwrap();
    }

    db.message()
        .delete(&UniqueWhere::by("id", message.id.as_str()))
        .await
        .unwrap();

    assert_eq!(db.attachment().count(&Filter::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_deleting_user_cascades_everywhere() {
    let db = setup_test_db().await;
    let user = create_user(&db, "gone@example.com").await;
    let other = create_user(&db, "stays@example.com").await;

    let chat = db.chat().create(&Chat::new(&user.id, None)).await.unwrap();
    db.message()
        .create(&Message::new(
            &chat.id,
            &user.id,
            MessageRole::User,
            NullableJson::DbNull,
        ))
        .await
        .unwrap();
    db.todo().create(&Todo::new(&user.id, "mine")).await.unwrap();
    db.todo().create(&Todo::new(&other.id, "theirs")).await.unwrap();
    db.account()
        .create(&Account::new(&user.id, "oauth", "github", "gh-9"))
        .await
        .unwrap();

    db.user()
        .delete(&UniqueWhere::by("id", user.id.as_str()))
        .await
        .unwrap();

    assert_eq!(db.chat().count(&Filter::default()).await.unwrap(), 0);
    assert_eq!(db.message().count(&Filter::default()).await.unwrap(), 0);
    assert_eq!(db.account().count(&Filter::default()).await.unwrap(), 0);
    let todos = db.todo().find_many(FindManyArgs::new()).await.unwrap();
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].user_id, other.id);
}

#[tokio::test]
async fn test_todo_status_drives_timestamps() {
    let db = setup_test_db().await;
    let user = create_user(&db, "todo@example.com").await;
    let todo = db.todo().create(&Todo::new(&user.id, "ship it")).await.unwrap();
    assert_eq!(todo.status, TodoStatus::Pending);
    assert!(!todo.completed);
    let selector = UniqueWhere::by("id", todo.id.as_str());

    let cancelled = db
        .todo()
        .update(&selector, Changes::new().set("status", TodoStatus::Cancelled))
        .await
        .unwrap();
    assert!(cancelled.cancelled_at.is_some());
    assert!(cancelled.done_at.is_none());
    assert!(!cancelled.completed);

    let finished = db
        .todo()
        .update(&selector, Changes::new().set("completed", true))
        .await
        .unwrap();
    assert_eq!(finished.status, TodoStatus::Finished);
    assert!(finished.done_at.is_some());
    assert!(finished.cancelled_at.is_none());

    let reopened = db
        .todo()
        .update(&selector, Changes::new().set("status", TodoStatus::Pending))
        .await
        .unwrap();
    assert!(!reopened.completed);
    assert!(reopened.done_at.is_none());
    assert!(reopened.cancelled_at.is_none());

    let err = db
        .todo()
        .update(&selector, Changes::new().set("cancelled_at", Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_repeated_terminal_status_keeps_first_stamp() {
    let db = setup_test_db().await;
    let user = create_user(&db, "again@example.com").await;
    let todo = db.todo().create(&Todo::new(&user.id, "once")).await.unwrap();
    let selector = UniqueWhere::by("id", todo.id.as_str());

    let finished = db
        .todo()
        .update(&selector, Changes::new().set("status", TodoStatus::Finished))
        .await
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    let again = db
        .todo()
        .update(
            &selector,
            Changes::new()
                .set("title", "once more")
                .set("status", TodoStatus::Finished),
        )
        .await
        .unwrap();
    assert_eq!(again.title, "once more");
    assert_eq!(again.done_at, finished.done_at);

    let cancelled = db
        .todo()
        .update(&selector, Changes::new().set("status", TodoStatus::Cancelled))
        .await
        .unwrap();
    assert!(cancelled.done_at.is_none());
    std::thread::sleep(std::time::Duration::from_millis(20));
    let again = db
        .todo()
        .update_many(
            &Filter::eq("id", todo.id.as_str()),
            Changes::new().set("status", TodoStatus::Cancelled),
        )
        .await
        .unwrap();
    assert_eq!(again, 1);
    let stored = db.todo().find_unique_or_throw(&selector).await.unwrap();
    assert_eq!(stored.cancelled_at, cancelled.cancelled_at);

    // leaving a terminal status and coming back stamps afresh
    db.todo()
        .update(&selector, Changes::new().set("status", TodoStatus::Pending))
        .await
        .unwrap();
    let refinished = db
        .todo()
        .update(&selector, Changes::new().set("completed", true))
        .await
        .unwrap();
    assert!(refinished.done_at > finished.done_at);
}

#[tokio::test]
async fn test_invalid_status_hits_check_constraint() {
    let db = setup_test_db().await;
    let user = create_user(&db, "check@example.com").await;
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        "INSERT INTO todos (id, user_id, title, completed, status, created_at, updated_at) \
         VALUES ('t1', ?, 'bad', 0, 'SNOOZED', ?, ?)",
    )
    .bind(&user.id)
    .bind(&now)
    .bind(&now)
    .execute(&*db)
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_json_null_three_states() {
    let db = setup_test_db().await;
    let user = create_user(&db, "json@example.com").await;
    let chat = db.chat().create(&Chat::new(&user.id, None)).await.unwrap();

    for parts in [
        NullableJson::DbNull,
        NullableJson::JsonNull,
        NullableJson::Value(json!({"type": "text", "text": "hi"})),
    ] {
        db.message()
            .create(&Message::new(&chat.id, &user.id, MessageRole::User, parts))
            .await
            .unwrap();
    }

    for (which, expected) in [
        (JsonNullFilter::DbNull, 1),
        (JsonNullFilter::JsonNull, 1),
        (JsonNullFilter::AnyNull, 2),
    ] {
        let count = db
            .message()
            .count(&Filter::json_null("parts", which))
            .await
            .unwrap();
        assert_eq!(count, expected, "{which:?}");
    }

    let stored = db
        .message()
        .find_many(FindManyArgs::new().order_by(OrderBy::asc("id")))
        .await
        .unwrap();
    let mut states: Vec<NullableJson> = stored.iter().map(Message::parts).collect();
    states.sort_by_key(|state| match state {
        NullableJson::DbNull => 0,
        NullableJson::JsonNull => 1,
        NullableJson::Value(_) => 2,
    });
    assert_eq!(states[0], NullableJson::DbNull);
    assert_eq!(states[1], NullableJson::JsonNull);
    assert_eq!(
        states[2],
        NullableJson::Value(json!({"type": "text", "text": "hi"}))
    );
}

#[tokio::test]
async fn test_message_role_enum_storage() {
    let db = setup_test_db().await;
    let user = create_user(&db, "roles@example.com").await;
    let chat = db.chat().create(&Chat::new(&user.id, None)).await.unwrap();

    for role in [MessageRole::User, MessageRole::Assistant] {
        let message = db
            .message()
            .create(&Message::new(&chat.id, &user.id, role, NullableJson::DbNull))
            .await
            .unwrap();

        let stored: String = sqlx::query_scalar("SELECT role FROM messages WHERE id = ?")
            .bind(&message.id)
            .fetch_one(&*db)
            .await
            .unwrap();
        assert_eq!(stored, role.as_str());
        assert_eq!(message.role, role);
    }
}
