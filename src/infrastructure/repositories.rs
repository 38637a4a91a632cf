//! DB Repository abstractions

use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::delegate::Delegate;
use crate::infrastructure::entities::{Attachment, Chat, Message, Todo, TodoStatus, User};
use crate::infrastructure::error::{StoreError, StoreResult};
use crate::infrastructure::query::{
    AggregateSpec, Changes, Filter, FindManyArgs, GroupByArgs, OrderBy, UniqueWhere, Value,
};
use crate::infrastructure::traits::{
    ChatRepository, MessageWithAttachments, TodoRepository, UserRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use di::{Ref, injectable};
use log::debug;
use std::collections::HashMap;
use std::str::FromStr;

#[injectable(UserRepository)]
pub struct DbUserRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl UserRepository for DbUserRepository {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        self.connection
            .user()
            .find_unique(&UniqueWhere::by("id", user_id))
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.connection
            .user()
            .find_unique(&UniqueWhere::by("email", email))
            .await
    }

    async fn create_user(&self, user: User) -> StoreResult<User> {
        self.connection.user().create(&user).await
    }

    async fn update_user(&self, user_id: &str, changes: Changes) -> StoreResult<User> {
        self.connection
            .user()
            .update(&UniqueWhere::by("id", user_id), changes)
            .await
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<User> {
        self.connection
            .user()
            .delete(&UniqueWhere::by("id", user_id))
            .await
    }
}

#[injectable(ChatRepository)]
pub struct DbChatRepository {
    connection: Ref<DatabaseConnection>,
}

fn owned_by(user_id: &str, id: &str) -> Filter {
    Filter::all([Filter::eq("id", id), Filter::eq("user_id", user_id)])
}

#[async_trait]
impl ChatRepository for DbChatRepository {
    async fn list_chats(&self, user_id: &str) -> StoreResult<Vec<Chat>> {
        self.connection
            .chat()
            .find_by_parent::<User>(
                user_id,
                FindManyArgs::new().order_by(OrderBy::asc("created_at")),
            )
            .await
    }

    async fn find_chat(&self, user_id: &str, chat_id: &str) -> StoreResult<Option<Chat>> {
        self.connection
            .chat()
            .find_first(FindManyArgs::new().filter(owned_by(user_id, chat_id)))
            .await
    }

    async fn create_chat(&self, chat: Chat) -> StoreResult<Chat> {
        self.connection.chat().create(&chat).await
    }

    async fn update_chat(&self, user_id: &str, chat_id: &str, changes: Changes) -> StoreResult<Chat> {
        self.connection
            .chat()
            .update_many_and_return(&owned_by(user_id, chat_id), changes)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound { model: "Chat" })
    }

    async fn delete_chat(&self, user_id: &str, chat_id: &str) -> StoreResult<Chat> {
        if self.find_chat(user_id, chat_id).await?.is_none() {
            return Err(StoreError::NotFound { model: "Chat" });
        }
        self.connection
            .chat()
            .delete(&UniqueWhere::by("id", chat_id))
            .await
    }

    async fn list_chat_messages(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> StoreResult<Vec<MessageWithAttachments>> {
        if self.find_chat(user_id, chat_id).await?.is_none() {
            return Ok(Vec::new());
        }

        let messages = self
            .connection
            .message()
            .find_by_parent::<Chat>(
                chat_id,
                FindManyArgs::new().order_by(OrderBy::asc("created_at")),
            )
            .await?;
        let attachments = self
            .connection
            .attachment()
            .find_many(
                FindManyArgs::new()
                    .filter(Filter::is_in(
                        "message_id",
                        messages.iter().map(|message| message.id.clone()),
                    ))
                    .order_by(OrderBy::asc("created_at")),
            )
            .await?;

        let mut by_message: HashMap<String, Vec<Attachment>> = HashMap::new();
        for attachment in attachments {
            by_message
                .entry(attachment.message_id.clone())
                .or_default()
                .push(attachment);
        }
        Ok(messages
            .into_iter()
            .map(|message| {
                let attachments = by_message.remove(&message.id).unwrap_or_default();
                (message, attachments)
            })
            .collect())
    }

    async fn create_message_in_chat(
        &self,
        message: Message,
        attachments: Vec<Attachment>,
        title: Option<String>,
    ) -> StoreResult<MessageWithAttachments> {
        let mut tx = self.connection.begin().await?;

        let message = Delegate::<Message>::create_with(&mut tx, &message).await?;
        let mut stored = Vec::with_capacity(attachments.len());
        for attachment in &attachments {
            stored.push(Delegate::<Attachment>::create_with(&mut tx, attachment).await?);
        }
        let mut touch = Changes::new().set("updated_at", Utc::now());
        if let Some(title) = title {
            touch = touch.set_if_null("title", title);
        }
        Delegate::<Chat>::update_with(
            &mut tx,
            &UniqueWhere::by("id", message.chat_id.as_str()),
            touch,
        )
        .await?;

        tx.commit().await.map_err(StoreError::Database)?;
        debug!(
            "stored message {} with {} attachment(s)",
            message.id,
            stored.len()
        );
        Ok((message, stored))
    }

    async fn delete_message(&self, user_id: &str, message_id: &str) -> StoreResult<()> {
        let message = self
            .connection
            .message()
            .find_unique_or_throw(&UniqueWhere::by("id", message_id))
            .await?;
        if self.find_chat(user_id, &message.chat_id).await?.is_none() {
            return Err(StoreError::NotFound { model: "Message" });
        }
        self.connection
            .message()
            .delete(&UniqueWhere::by("id", message_id))
            .await?;
        Ok(())
    }
}

#[injectable(TodoRepository)]
pub struct DbTodoRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl TodoRepository for DbTodoRepository {
    async fn list_todos(&self, user_id: &str, status: Option<TodoStatus>) -> StoreResult<Vec<Todo>> {
        let filter = match status {
            Some(status) => Filter::eq("status", status),
            None => Filter::default(),
        };
        self.connection
            .todo()
            .find_by_parent::<User>(
                user_id,
                FindManyArgs::new()
                    .filter(filter)
                    .order_by(OrderBy::asc("created_at")),
            )
            .await
    }

    async fn create_todo(&self, todo: Todo) -> StoreResult<Todo> {
        self.connection.todo().create(&todo).await
    }

    async fn update_todo(&self, user_id: &str, todo_id: &str, changes: Changes) -> StoreResult<Todo> {
        self.connection
            .todo()
            .update_many_and_return(&owned_by(user_id, todo_id), changes)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound { model: "Todo" })
    }

    async fn delete_todo(&self, user_id: &str, todo_id: &str) -> StoreResult<Todo> {
        let todo = self
            .connection
            .todo()
            .find_first_or_throw(FindManyArgs::new().filter(owned_by(user_id, todo_id)))
            .await?;
        self.connection
            .todo()
            .delete(&UniqueWhere::by("id", todo.id.as_str()))
            .await
    }

    async fn count_todos_by_status(&self, user_id: &str) -> StoreResult<Vec<(TodoStatus, i64)>> {
        let groups = self
            .connection
            .todo()
            .group_by(&GroupByArgs {
                by: vec!["status".to_owned()],
                filter: Filter::eq("user_id", user_id),
                aggregates: AggregateSpec::count(),
                order_by: vec![OrderBy::asc("status")],
                ..GroupByArgs::default()
            })
            .await?;

        groups
            .into_iter()
            .map(|group| -> StoreResult<(TodoStatus, i64)> {
                let status = match group.keys.get("status") {
                    Some(Value::Text(status)) => TodoStatus::from_str(status).map_err(|reason| {
                        StoreError::InvalidArgument {
                            model: "Todo",
                            reason,
                        }
                    })?,
                    other => {
                        return Err(StoreError::InvalidArgument {
                            model: "Todo",
                            reason: format!("unexpected status key {other:?}"),
                        });
                    }
                };
                Ok((status, group.aggregates.count.unwrap_or_default()))
            })
            .collect()
    }
}
