//! Database entities

use crate::infrastructure::error::{StoreError, StoreResult};
use crate::infrastructure::query::{Changes, FieldUpdate, NullableJson, Value};
use crate::infrastructure::schema::{self, Model, ModelDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "USER",
            MessageRole::Assistant => "ASSISTANT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TodoStatus {
    Pending,
    Finished,
    Cancelled,
}

impl TodoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TodoStatus::Pending => "PENDING",
            TodoStatus::Finished => "FINISHED",
            TodoStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TodoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TodoStatus::Pending),
            "FINISHED" => Ok(TodoStatus::Finished),
            "CANCELLED" => Ok(TodoStatus::Cancelled),
            other => Err(format!("unknown todo status `{other}`")),
        }
    }
}

impl From<MessageRole> for Value {
    fn from(role: MessageRole) -> Self {
        Value::Text(role.as_str().to_owned())
    }
}

impl From<TodoStatus> for Value {
    fn from(status: TodoStatus) -> Self {
        Value::Text(status.as_str().to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub email_verified: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub background: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        User {
            id: new_id(),
            name: name.into(),
            email: email.into(),
            email_verified: None,
            image: None,
            background: None,
            bio: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Model for User {
    const DESCRIPTOR: &'static ModelDescriptor = &schema::USER;

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.clone().into()),
            ("name", self.name.clone().into()),
            ("email", self.email.clone().into()),
            ("email_verified", self.email_verified.into()),
            ("image", self.image.clone().into()),
            ("background", self.background.clone().into()),
            ("bio", self.bio.clone().into()),
            ("created_at", self.created_at.into()),
            ("updated_at", self.updated_at.into()),
        ]
    }
}

/// OAuth credential linked to a user.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub provider: String,
    pub provider_account_id: String,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    /// Epoch seconds.
    pub expires_at: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    pub session_state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        user_id: impl Into<String>,
        kind: impl Into<String>,
        provider: impl Into<String>,
        provider_account_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Account {
            id: new_id(),
            user_id: user_id.into(),
            kind: kind.into(),
            provider: provider.into(),
            provider_account_id: provider_account_id.into(),
            refresh_token: None,
            access_token: None,
            expires_at: None,
            token_type: None,
            scope: None,
            id_token: None,
            session_state: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Model for Account {
    const DESCRIPTOR: &'static ModelDescriptor = &schema::ACCOUNT;

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.clone().into()),
            ("user_id", self.user_id.clone().into()),
            ("type", self.kind.clone().into()),
            ("provider", self.provider.clone().into()),
            ("provider_account_id", self.provider_account_id.clone().into()),
            ("refresh_token", self.refresh_token.clone().into()),
            ("access_token", self.access_token.clone().into()),
            ("expires_at", self.expires_at.into()),
            ("token_type", self.token_type.clone().into()),
            ("scope", self.scope.clone().into()),
            ("id_token", self.id_token.clone().into()),
            ("session_state", self.session_state.clone().into()),
            ("created_at", self.created_at.into()),
            ("updated_at", self.updated_at.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Session {
    pub id: String,
    pub session_token: String,
    pub user_id: String,
    pub expires: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        session_token: impl Into<String>,
        expires: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Session {
            id: new_id(),
            session_token: session_token.into(),
            user_id: user_id.into(),
            expires,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Model for Session {
    const DESCRIPTOR: &'static ModelDescriptor = &schema::SESSION;

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.clone().into()),
            ("session_token", self.session_token.clone().into()),
            ("user_id", self.user_id.clone().into()),
            ("expires", self.expires.into()),
            ("created_at", self.created_at.into()),
            ("updated_at", self.updated_at.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct VerificationToken {
    pub identifier: String,
    pub token: String,
    pub expires: DateTime<Utc>,
}

impl Model for VerificationToken {
    const DESCRIPTOR: &'static ModelDescriptor = &schema::VERIFICATION_TOKEN;

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("identifier", self.identifier.clone().into()),
            ("token", self.token.clone().into()),
            ("expires", self.expires.into()),
        ]
    }
}

/// WebAuthn credential.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Authenticator {
    pub credential_id: String,
    pub user_id: String,
    pub provider_account_id: String,
    pub credential_public_key: String,
    pub counter: i64,
    pub credential_device_type: String,
    pub credential_backed_up: bool,
    pub transports: Option<String>,
}

impl Model for Authenticator {
    const DESCRIPTOR: &'static ModelDescriptor = &schema::AUTHENTICATOR;

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("credential_id", self.credential_id.clone().into()),
            ("user_id", self.user_id.clone().into()),
            ("provider_account_id", self.provider_account_id.clone().into()),
            ("credential_public_key", self.credential_public_key.clone().into()),
            ("counter", self.counter.into()),
            ("credential_device_type", self.credential_device_type.clone().into()),
            ("credential_backed_up", self.credential_backed_up.into()),
            ("transports", self.transports.clone().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Todo {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub completed: bool,
    pub status: TodoStatus,
    pub done_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Todo {
            id: new_id(),
            user_id: user_id.into(),
            title: title.into(),
            completed: false,
            status: TodoStatus::Pending,
            done_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Model for Todo {
    const DESCRIPTOR: &'static ModelDescriptor = &schema::TODO;

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.clone().into()),
            ("user_id", self.user_id.clone().into()),
            ("title", self.title.clone().into()),
            ("completed", self.completed.into()),
            ("status", self.status.into()),
            ("done_at", self.done_at.into()),
            ("cancelled_at", self.cancelled_at.into()),
            ("created_at", self.created_at.into()),
            ("updated_at", self.updated_at.into()),
        ]
    }

    /// `status` is authoritative: `completed`, `done_at` and `cancelled_at` follow it.
    ///
    /// Writing `completed` alone moves the status between `PENDING` and `FINISHED`; the
    /// timestamps cannot be written without a status.
    fn normalize_write(changes: &mut Changes, now: DateTime<Utc>) -> StoreResult<()> {
        let invalid = |reason: String| StoreError::InvalidArgument {
            model: schema::TODO.name,
            reason,
        };

        let status = match (changes.get("status"), changes.get("completed")) {
            (Some(FieldUpdate::Set(Value::Text(status))), _) => {
                TodoStatus::from_str(status).map_err(invalid)?
            }
            (Some(other), _) => {
                return Err(invalid(format!("invalid status assignment {other:?}")));
            }
            (None, Some(FieldUpdate::Set(Value::Bool(true)))) => TodoStatus::Finished,
            (None, Some(FieldUpdate::Set(Value::Bool(false)))) => TodoStatus::Pending,
            (None, Some(other)) => {
                return Err(invalid(format!("invalid completed assignment {other:?}")));
            }
            (None, None) => {
                if changes.contains("done_at") || changes.contains("cancelled_at") {
                    return Err(invalid(
                        "done_at and cancelled_at follow the status; set status instead".to_owned(),
                    ));
                }
                return Ok(());
            }
        };

        // A repeated FINISHED or CANCELLED write keeps the original stamp.
        let stamp = |field: &str| match changes.value(field) {
            Some(value @ Value::DateTime(_)) => FieldUpdate::Set(value.clone()),
            _ => FieldUpdate::SetIfNull(Value::DateTime(now)),
        };
        let cleared = || FieldUpdate::Set(Value::Null);
        let (done_at, cancelled_at) = match status {
            TodoStatus::Pending => (cleared(), cleared()),
            TodoStatus::Finished => (stamp("done_at"), cleared()),
            TodoStatus::Cancelled => (cleared(), stamp("cancelled_at")),
        };

        changes.put("status", FieldUpdate::Set(status.into()));
        changes.put(
            "completed",
            FieldUpdate::Set((status == TodoStatus::Finished).into()),
        );
        changes.put("done_at", done_at);
        changes.put("cancelled_at", cancelled_at);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(user_id: impl Into<String>, title: Option<String>) -> Self {
        let now = Utc::now();
        Chat {
            id: new_id(),
            user_id: user_id.into(),
            title,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Model for Chat {
    const DESCRIPTOR: &'static ModelDescriptor = &schema::CHAT;

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.clone().into()),
            ("user_id", self.user_id.clone().into()),
            ("title", self.title.clone().into()),
            ("created_at", self.created_at.into()),
            ("updated_at", self.updated_at.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub user_id: String,
    pub role: MessageRole,
    /// `None` is SQL `NULL`; `Some(Json(Value::Null))` is a stored JSON `null`.
    pub parts: Option<Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        role: MessageRole,
        parts: NullableJson,
    ) -> Self {
        Message {
            id: new_id(),
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            role,
            parts: parts.into_column(),
            created_at: Utc::now(),
        }
    }

    pub fn parts(&self) -> NullableJson {
        NullableJson::from_column(self.parts.clone())
    }
}

impl Model for Message {
    const DESCRIPTOR: &'static ModelDescriptor = &schema::MESSAGE;

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.clone().into()),
            ("chat_id", self.chat_id.clone().into()),
            ("user_id", self.user_id.clone().into()),
            ("role", self.role.into()),
            ("parts", self.parts().into()),
            ("created_at", self.created_at.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub url: String,
    pub name: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(
        message_id: impl Into<String>,
        url: impl Into<String>,
        name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Attachment {
            id: new_id(),
            message_id: message_id.into(),
            url: url.into(),
            name: name.into(),
            content_type: content_type.into(),
            created_at: Utc::now(),
        }
    }
}

impl Model for Attachment {
    const DESCRIPTOR: &'static ModelDescriptor = &schema::ATTACHMENT;

    fn to_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.clone().into()),
            ("message_id", self.message_id.clone().into()),
            ("url", self.url.clone().into()),
            ("name", self.name.clone().into()),
            ("content_type", self.content_type.clone().into()),
            ("created_at", self.created_at.into()),
        ]
    }
}
