//! Infrastructure traits, used for DI on higher levels

use crate::infrastructure::entities;
use crate::infrastructure::entities::TodoStatus;
use crate::infrastructure::error::StoreResult;
use crate::infrastructure::query::Changes;
use async_trait::async_trait;

/// A message together with its attachments.
pub type MessageWithAttachments = (entities::Message, Vec<entities::Attachment>);

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<entities::User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<entities::User>>;

    async fn create_user(&self, user: entities::User) -> StoreResult<entities::User>;

    async fn update_user(&self, user_id: &str, changes: Changes) -> StoreResult<entities::User>;

    async fn delete_user(&self, user_id: &str) -> StoreResult<entities::User>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn list_chats(&self, user_id: &str) -> StoreResult<Vec<entities::Chat>>;

    /// The chat, if it exists and belongs to `user_id`.
    async fn find_chat(&self, user_id: &str, chat_id: &str)
    -> StoreResult<Option<entities::Chat>>;

    async fn create_chat(&self, chat: entities::Chat) -> StoreResult<entities::Chat>;

    async fn update_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        changes: Changes,
    ) -> StoreResult<entities::Chat>;

    async fn delete_chat(&self, user_id: &str, chat_id: &str) -> StoreResult<entities::Chat>;

    async fn list_chat_messages(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> StoreResult<Vec<MessageWithAttachments>>;

    /// Stores the message and its attachments atomically and touches the chat.
    ///
    /// `title` names the chat in the same transaction, unless it already has a title.
    async fn create_message_in_chat(
        &self,
        message: entities::Message,
        attachments: Vec<entities::Attachment>,
        title: Option<String>,
    ) -> StoreResult<MessageWithAttachments>;

    async fn delete_message(&self, user_id: &str, message_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait TodoRepository: Send + Sync {
    async fn list_todos(
        &self,
        user_id: &str,
        status: Option<TodoStatus>,
    ) -> StoreResult<Vec<entities::Todo>>;

    async fn create_todo(&self, todo: entities::Todo) -> StoreResult<entities::Todo>;

    async fn update_todo(
        &self,
        user_id: &str,
        todo_id: &str,
        changes: Changes,
    ) -> StoreResult<entities::Todo>;

    async fn delete_todo(&self, user_id: &str, todo_id: &str) -> StoreResult<entities::Todo>;

    async fn count_todos_by_status(&self, user_id: &str) -> StoreResult<Vec<(TodoStatus, i64)>>;
}
