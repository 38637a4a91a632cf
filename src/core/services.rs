//! Implementations for the services the app needs.
//!

use crate::core::traits::{ChatService, NewAttachment, ProfileUpdate, TodoService, UserService};
use crate::infrastructure::entities::{
    Attachment, Chat, Message, MessageRole, Todo, TodoStatus, User,
};
use crate::infrastructure::error::{StoreError, StoreResult};
use crate::infrastructure::query::{Changes, NullableJson};
use crate::infrastructure::traits::{
    ChatRepository, MessageWithAttachments, TodoRepository, UserRepository,
};
use async_trait::async_trait;
use di::{Ref, injectable};
use log::info;

const MAX_TITLE_CHARS: usize = 80;

#[injectable(UserService)]
pub struct MyUserService {
    repo: Ref<dyn UserRepository>,
}

#[async_trait]
impl UserService for MyUserService {
    async fn register(&self, name: String, email: String) -> StoreResult<User> {
        let email = email.trim().to_lowercase();
        let valid = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid {
            return Err(StoreError::InvalidArgument {
                model: "User",
                reason: format!("`{email}` is not an email address"),
            });
        }
        if self.repo.find_user_by_email(&email).await?.is_some() {
            return Err(StoreError::UniqueViolation {
                model: "User",
                detail: format!("`{email}` is already registered"),
            });
        }
        let user = self.repo.create_user(User::new(name.trim(), email)).await?;
        info!("registered user {}", user.id);
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<User> {
        self.repo
            .find_user(user_id)
            .await?
            .ok_or(StoreError::NotFound { model: "User" })
    }

    async fn update_profile(&self, user_id: &str, profile: ProfileUpdate) -> StoreResult<User> {
        let mut changes = Changes::new();
        if let Some(name) = profile.name {
            changes = changes.set("name", name.trim());
        }
        if let Some(image) = profile.image {
            changes = changes.set("image", image);
        }
        if let Some(background) = profile.background {
            changes = changes.set("background", background);
        }
        if let Some(bio) = profile.bio {
            changes = changes.set("bio", bio);
        }
        self.repo.update_user(user_id, changes).await
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<()> {
        let user = self.repo.delete_user(user_id).await?;
        info!("deleted user {}", user.id);
        Ok(())
    }
}

#[injectable(ChatService)]
pub struct MyChatService {
    repo: Ref<dyn ChatRepository>,
}

/// First text found in message parts, cut down to a chat title.
pub fn title_from_parts(parts: &serde_json::Value) -> Option<String> {
    let text = match parts {
        serde_json::Value::String(text) => Some(text.as_str()),
        serde_json::Value::Array(items) => items.iter().find_map(|item| {
            match (item.get("type"), item.get("text")) {
                (Some(kind), Some(serde_json::Value::String(text))) if kind == "text" => {
                    Some(text.as_str())
                }
                _ => None,
            }
        }),
        _ => None,
    }?;
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    Some(line.chars().take(MAX_TITLE_CHARS).collect())
}

#[async_trait]
impl ChatService for MyChatService {
    async fn list_chats(&self, user_id: &str) -> StoreResult<Vec<Chat>> {
        self.repo.list_chats(user_id).await
    }

    async fn create_chat(&self, user_id: &str, title: Option<String>) -> StoreResult<Chat> {
        let title = title
            .map(|title| title.trim().to_owned())
            .filter(|title| !title.is_empty());
        self.repo.create_chat(Chat::new(user_id, title)).await
    }

    async fn get_chat(&self, user_id: &str, chat_id: &str) -> StoreResult<Chat> {
        self.repo
            .find_chat(user_id, chat_id)
            .await?
            .ok_or(StoreError::NotFound { model: "Chat" })
    }

    async fn rename_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        title: Option<String>,
    ) -> StoreResult<Chat> {
        self.repo
            .update_chat(user_id, chat_id, Changes::new().set("title", title))
            .await
    }

    async fn delete_chat(&self, user_id: &str, chat_id: &str) -> StoreResult<()> {
        self.repo.delete_chat(user_id, chat_id).await?;
        info!("deleted chat {chat_id}");
        Ok(())
    }

    async fn list_messages(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> StoreResult<Vec<MessageWithAttachments>> {
        self.repo.list_chat_messages(user_id, chat_id).await
    }

    async fn post_message(
        &self,
        user_id: &str,
        chat_id: &str,
        role: MessageRole,
        parts: NullableJson,
        attachments: Vec<NewAttachment>,
    ) -> StoreResult<MessageWithAttachments> {
        let chat = self
            .repo
            .find_chat(user_id, chat_id)
            .await?
            .ok_or(StoreError::NotFound { model: "Chat" })?;

        let derived_title = match (&chat.title, role, &parts) {
            (None, MessageRole::User, NullableJson::Value(parts)) => title_from_parts(parts),
            _ => None,
        };

        let message = Message::new(chat_id, user_id, role, parts);
        let attachments = attachments
            .into_iter()
            .map(|attachment| {
                Attachment::new(
                    message.id.as_str(),
                    attachment.url,
                    attachment.name,
                    attachment.content_type,
                )
            })
            .collect();
        self.repo
            .create_message_in_chat(message, attachments, derived_title)
            .await
    }

    async fn delete_message(&self, user_id: &str, message_id: &str) -> StoreResult<()> {
        self.repo.delete_message(user_id, message_id).await
    }
}

#[injectable(TodoService)]
pub struct MyTodoService {
    repo: Ref<dyn TodoRepository>,
}

fn clean_title(title: &str) -> StoreResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StoreError::InvalidArgument {
            model: "Todo",
            reason: "title must not be blank".to_owned(),
        });
    }
    Ok(title.to_owned())
}

#[async_trait]
impl TodoService for MyTodoService {
    async fn list_todos(&self, user_id: &str, status: Option<TodoStatus>) -> StoreResult<Vec<Todo>> {
        self.repo.list_todos(user_id, status).await
    }

    async fn create_todo(&self, user_id: &str, title: String) -> StoreResult<Todo> {
        let title = clean_title(&title)?;
        self.repo.create_todo(Todo::new(user_id, title)).await
    }

    async fn update_todo(
        &self,
        user_id: &str,
        todo_id: &str,
        title: Option<String>,
        status: Option<TodoStatus>,
    ) -> StoreResult<Todo> {
        let mut changes = Changes::new();
        if let Some(title) = title {
            changes = changes.set("title", clean_title(&title)?);
        }
        if let Some(status) = status {
            changes = changes.set("status", status);
        }
        self.repo.update_todo(user_id, todo_id, changes).await
    }

    async fn delete_todo(&self, user_id: &str, todo_id: &str) -> StoreResult<()> {
        self.repo.delete_todo(user_id, todo_id).await?;
        Ok(())
    }

    async fn todo_stats(&self, user_id: &str) -> StoreResult<Vec<(TodoStatus, i64)>> {
        let counts = self.repo.count_todos_by_status(user_id).await?;
        Ok([TodoStatus::Pending, TodoStatus::Finished, TodoStatus::Cancelled]
            .into_iter()
            .map(|status| {
                let count = counts
                    .iter()
                    .find(|(counted, _)| *counted == status)
                    .map_or(0, |(_, count)| *count);
                (status, count)
            })
            .collect())
    }
}
