//! Table metadata
//!
//! Every entity is described once by a [`ModelDescriptor`]: its columns, the key used to
//! identify a single row, the declared unique keys and the foreign keys pointing at parent
//! tables. The generic operations in [`crate::infrastructure::delegate`] read these
//! descriptors to validate field names and render SQL, so no per-entity query code exists.

use crate::infrastructure::error::{StoreError, StoreResult};
use crate::infrastructure::query::{Changes, Value};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::sqlite::SqliteRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
    DateTime,
    Json,
    /// Text column restricted to the listed variants.
    Enum(&'static [&'static str]),
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::Integer)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl Field {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Field {
            name,
            kind,
            nullable: false,
        }
    }

    const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Field {
            name,
            kind,
            nullable: true,
        }
    }

    /// Rejects text outside an enum field's variants before it reaches the CHECK constraint.
    pub fn check_value(&self, model: &'static str, value: &Value) -> StoreResult<()> {
        match (self.kind, value) {
            (FieldKind::Enum(variants), Value::Text(text))
                if !variants.contains(&text.as_str()) =>
            {
                Err(StoreError::InvalidArgument {
                    model,
                    reason: format!(
                        "`{text}` is not a valid {}, expected one of {}",
                        self.name,
                        variants.join(", ")
                    ),
                })
            }
            _ => Ok(()),
        }
    }
}

/// A foreign key from `field` to the identity of the `references` table.
///
/// Every foreign key cascades on delete; the migration declares it.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub field: &'static str,
    pub references: &'static str,
}

#[derive(Debug)]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub table: &'static str,
    pub fields: &'static [Field],
    /// Columns identifying one row; also the tiebreak for ordered pagination.
    pub identity: &'static [&'static str],
    /// Additional unique keys, single or compound.
    pub unique_keys: &'static [&'static [&'static str]],
    pub relations: &'static [Relation],
    pub created_at: Option<&'static str>,
    pub updated_at: Option<&'static str>,
}

impl ModelDescriptor {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn require_field(&self, name: &str) -> StoreResult<&Field> {
        self.field(name).ok_or_else(|| StoreError::UnknownField {
            model: self.name,
            field: name.to_owned(),
        })
    }

    /// Returns the declared key whose columns are exactly `columns`, in any order.
    pub fn unique_key_for(&self, columns: &[&str]) -> Option<&'static [&'static str]> {
        std::iter::once(self.identity)
            .chain(self.unique_keys.iter().copied())
            .find(|key| {
                key.len() == columns.len() && key.iter().all(|column| columns.contains(column))
            })
    }

    pub fn relation_to(&self, table: &str) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|relation| relation.references == table)
    }
}

/// A persisted entity.
pub trait Model: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + Sized {
    const DESCRIPTOR: &'static ModelDescriptor;

    /// Column values written when the row is inserted.
    fn to_values(&self) -> Vec<(&'static str, Value)>;

    /// Adjusts a pending write before it reaches the database.
    ///
    /// Runs for inserts (with every column set) and for updates (with only the changed
    /// columns). The default keeps the write as is.
    fn normalize_write(_changes: &mut Changes, _now: DateTime<Utc>) -> StoreResult<()> {
        Ok(())
    }
}

/// Double-quotes an SQL identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub const MESSAGE_ROLES: &[&str] = &["USER", "ASSISTANT"];
pub const TODO_STATUSES: &[&str] = &["PENDING", "FINISHED", "CANCELLED"];

const BELONGS_TO_USER: Relation = Relation {
    field: "user_id",
    references: "users",
};

pub static USER: ModelDescriptor = ModelDescriptor {
    name: "User",
    table: "users",
    fields: &[
        Field::new("id", FieldKind::Text),
        Field::new("name", FieldKind::Text),
        Field::new("email", FieldKind::Text),
        Field::optional("email_verified", FieldKind::DateTime),
        Field::optional("image", FieldKind::Text),
        Field::optional("background", FieldKind::Text),
        Field::optional("bio", FieldKind::Text),
        Field::new("created_at", FieldKind::DateTime),
        Field::new("updated_at", FieldKind::DateTime),
    ],
    identity: &["id"],
    unique_keys: &[&["email"]],
    relations: &[],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
};

pub static ACCOUNT: ModelDescriptor = ModelDescriptor {
    name: "Account",
    table: "accounts",
    fields: &[
        Field::new("id", FieldKind::Text),
        Field::new("user_id", FieldKind::Text),
        Field::new("type", FieldKind::Text),
        Field::new("provider", FieldKind::Text),
        Field::new("provider_account_id", FieldKind::Text),
        Field::optional("refresh_token", FieldKind::Text),
        Field::optional("access_token", FieldKind::Text),
        Field::optional("expires_at", FieldKind::Integer),
        Field::optional("token_type", FieldKind::Text),
        Field::optional("scope", FieldKind::Text),
        Field::optional("id_token", FieldKind::Text),
        Field::optional("session_state", FieldKind::Text),
        Field::new("created_at", FieldKind::DateTime),
        Field::new("updated_at", FieldKind::DateTime),
    ],
    identity: &["id"],
    unique_keys: &[&["provider", "provider_account_id"]],
    relations: &[BELONGS_TO_USER],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
};

pub static SESSION: ModelDescriptor = ModelDescriptor {
    name: "Session",
    table: "sessions",
    fields: &[
        Field::new("id", FieldKind::Text),
        Field::new("session_token", FieldKind::Text),
        Field::new("user_id", FieldKind::Text),
        Field::new("expires", FieldKind::DateTime),
        Field::new("created_at", FieldKind::DateTime),
        Field::new("updated_at", FieldKind::DateTime),
    ],
    identity: &["id"],
    unique_keys: &[&["session_token"]],
    relations: &[BELONGS_TO_USER],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
};

pub static VERIFICATION_TOKEN: ModelDescriptor = ModelDescriptor {
    name: "VerificationToken",
    table: "verification_tokens",
    fields: &[
        Field::new("identifier", FieldKind::Text),
        Field::new("token", FieldKind::Text),
        Field::new("expires", FieldKind::DateTime),
    ],
    identity: &["identifier", "token"],
    unique_keys: &[],
    relations: &[],
    created_at: None,
    updated_at: None,
};

pub static AUTHENTICATOR: ModelDescriptor = ModelDescriptor {
    name: "Authenticator",
    table: "authenticators",
    fields: &[
        Field::new("credential_id", FieldKind::Text),
        Field::new("user_id", FieldKind::Text),
        Field::new("provider_account_id", FieldKind::Text),
        Field::new("credential_public_key", FieldKind::Text),
        Field::new("counter", FieldKind::Integer),
        Field::new("credential_device_type", FieldKind::Text),
        Field::new("credential_backed_up", FieldKind::Boolean),
        Field::optional("transports", FieldKind::Text),
    ],
    identity: &["credential_id"],
    unique_keys: &[&["user_id", "credential_id"]],
    relations: &[BELONGS_TO_USER],
    created_at: None,
    updated_at: None,
};

pub static TODO: ModelDescriptor = ModelDescriptor {
    name: "Todo",
    table: "todos",
    fields: &[
        Field::new("id", FieldKind::Text),
        Field::new("user_id", FieldKind::Text),
        Field::new("title", FieldKind::Text),
        Field::new("completed", FieldKind::Boolean),
        Field::new("status", FieldKind::Enum(TODO_STATUSES)),
        Field::optional("done_at", FieldKind::DateTime),
        Field::optional("cancelled_at", FieldKind::DateTime),
        Field::new("created_at", FieldKind::DateTime),
        Field::new("updated_at", FieldKind::DateTime),
    ],
    identity: &["id"],
    unique_keys: &[],
    relations: &[BELONGS_TO_USER],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
};

pub static CHAT: ModelDescriptor = ModelDescriptor {
    name: "Chat",
    table: "chats",
    fields: &[
        Field::new("id", FieldKind::Text),
        Field::new("user_id", FieldKind::Text),
        Field::optional("title", FieldKind::Text),
        Field::new("created_at", FieldKind::DateTime),
        Field::new("updated_at", FieldKind::DateTime),
    ],
    identity: &["id"],
    unique_keys: &[],
    relations: &[BELONGS_TO_USER],
    created_at: Some("created_at"),
    updated_at: Some("updated_at"),
};

pub static MESSAGE: ModelDescriptor = ModelDescriptor {
    name: "Message",
    table: "messages",
    fields: &[
        Field::new("id", FieldKind::Text),
        Field::new("chat_id", FieldKind::Text),
        Field::new("user_id", FieldKind::Text),
        Field::new("role", FieldKind::Enum(MESSAGE_ROLES)),
        Field::optional("parts", FieldKind::Json),
        Field::new("created_at", FieldKind::DateTime),
    ],
    identity: &["id"],
    unique_keys: &[],
    relations: &[
        Relation {
            field: "chat_id",
            references: "chats",
        },
        BELONGS_TO_USER,
    ],
    created_at: Some("created_at"),
    updated_at: None,
};

pub static ATTACHMENT: ModelDescriptor = ModelDescriptor {
    name: "Attachment",
    table: "attachments",
    fields: &[
        Field::new("id", FieldKind::Text),
        Field::new("message_id", FieldKind::Text),
        Field::new("url", FieldKind::Text),
        Field::new("name", FieldKind::Text),
        Field::new("content_type", FieldKind::Text),
        Field::new("created_at", FieldKind::DateTime),
    ],
    identity: &["id"],
    unique_keys: &[],
    relations: &[Relation {
        field: "message_id",
        references: "messages",
    }],
    created_at: Some("created_at"),
    updated_at: None,
};

/// All tables, parents before children.
pub static MODELS: &[&ModelDescriptor] = &[
    &USER,
    &ACCOUNT,
    &SESSION,
    &VERIFICATION_TOKEN,
    &AUTHENTICATOR,
    &TODO,
    &CHAT,
    &MESSAGE,
    &ATTACHMENT,
];
