//! DI "Interfaces"

use crate::infrastructure::entities;
use crate::infrastructure::entities::{MessageRole, TodoStatus};
use crate::infrastructure::error::StoreResult;
use crate::infrastructure::query::NullableJson;
use crate::infrastructure::traits::MessageWithAttachments;
use async_trait::async_trait;

/// File reference supplied with a new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub url: String,
    pub name: String,
    pub content_type: String,
}

#[async_trait]
pub trait UserService: Send + Sync {
    /// Registers a user. Emails are stored lower-cased.
    ///
    /// Returns `Err` if the email is malformed or already taken.
    async fn register(&self, name: String, email: String) -> StoreResult<entities::User>;

    async fn get_user(&self, user_id: &str) -> StoreResult<entities::User>;

    async fn update_profile(
        &self,
        user_id: &str,
        profile: ProfileUpdate,
    ) -> StoreResult<entities::User>;

    /// Deletes the user together with everything they own.
    async fn delete_user(&self, user_id: &str) -> StoreResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub image: Option<Option<String>>,
    pub background: Option<Option<String>>,
    pub bio: Option<Option<String>>,
}

#[async_trait]
pub trait ChatService: Send + Sync {
    /// Lists all chats of the given user, oldest first.
    async fn list_chats(&self, user_id: &str) -> StoreResult<Vec<entities::Chat>>;

    /// Creates a new chat for the given user.
    async fn create_chat(&self, user_id: &str, title: Option<String>)
    -> StoreResult<entities::Chat>;

    /// Returns `Err` if the chat does not exist or belongs to someone else.
    async fn get_chat(&self, user_id: &str, chat_id: &str) -> StoreResult<entities::Chat>;

    async fn rename_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        title: Option<String>,
    ) -> StoreResult<entities::Chat>;

    /// Deletes a chat with its messages and attachments.
    ///
    /// Returns `Err` if the chat does not exist or belongs to someone else.
    async fn delete_chat(&self, user_id: &str, chat_id: &str) -> StoreResult<()>;

    /// List all messages in a chat.
    ///
    /// A chat the user cannot see yields an empty list.
    async fn list_messages(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> StoreResult<Vec<MessageWithAttachments>>;

    /// Creates a new message in a chat.
    ///
    /// `post_user_message` covers the common case.
    async fn post_message(
        &self,
        user_id: &str,
        chat_id: &str,
        role: MessageRole,
        parts: NullableJson,
        attachments: Vec<NewAttachment>,
    ) -> StoreResult<MessageWithAttachments>;

    /// Create a new user message in a chat.
    ///
    /// Returns `Err` if the chat does not exist or the user doesn't own it.
    async fn post_user_message(
        &self,
        user_id: &str,
        chat_id: &str,
        parts: serde_json::Value,
        attachments: Vec<NewAttachment>,
    ) -> StoreResult<MessageWithAttachments> {
        self.post_message(
            user_id,
            chat_id,
            MessageRole::User,
            NullableJson::Value(parts),
            attachments,
        )
        .await
    }

    async fn delete_message(&self, user_id: &str, message_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait TodoService: Send + Sync {
    async fn list_todos(
        &self,
        user_id: &str,
        status: Option<TodoStatus>,
    ) -> StoreResult<Vec<entities::Todo>>;

    /// Returns `Err` for a blank title.
    async fn create_todo(&self, user_id: &str, title: String) -> StoreResult<entities::Todo>;

    async fn update_todo(
        &self,
        user_id: &str,
        todo_id: &str,
        title: Option<String>,
        status: Option<TodoStatus>,
    ) -> StoreResult<entities::Todo>;

    async fn delete_todo(&self, user_id: &str, todo_id: &str) -> StoreResult<()>;

    /// Number of todos per status; statuses without todos are reported as zero.
    async fn todo_stats(&self, user_id: &str) -> StoreResult<Vec<(TodoStatus, i64)>>;
}
