//! Chat and message endpoints

use crate::api::chats::schemas::{
    ChatDetail, ChatList, CreateChat, CreateMessage, MessagesList, RenameChat,
};
use crate::api::{ApiError, ApiResult, ExtractUser};
use crate::core::traits::{ChatService, NewAttachment};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, get, patch};
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_chats).post(new_chat))
        .route("/:id", patch(rename_chat).delete(delete_chat))
        .route("/:id/messages", get(chat_messages).post(post_message))
}

pub fn messages_router() -> Router {
    Router::new().route("/:id", delete(delete_message))
}

async fn list_chats(
    Inject(chat_service): Inject<dyn ChatService>,
    ExtractUser(current_user): ExtractUser,
) -> ApiResult<ChatList> {
    let chats = chat_service.list_chats(&current_user).await?;

    Ok((
        StatusCode::OK,
        ChatList {
            chats: chats.into_iter().map(schemas::Chat::from).collect(),
        }
        .into(),
    ))
}

async fn new_chat(
    Inject(chat_service): Inject<dyn ChatService>,
    ExtractUser(current_user): ExtractUser,
    Json(create_chat): Json<CreateChat>,
) -> ApiResult<ChatDetail> {
    let chat = chat_service
        .create_chat(&current_user, create_chat.title)
        .await?;

    let mut messages = Vec::new();
    if let Some(parts) = create_chat.message {
        messages.push(
            chat_service
                .post_user_message(&current_user, &chat.id, parts, Vec::new())
                .await?,
        );
    }

    // the opening message may have named the chat
    let chat = if messages.is_empty() {
        chat
    } else {
        chat_service.get_chat(&current_user, &chat.id).await?
    };

    Ok((
        StatusCode::CREATED,
        Json(ChatDetail {
            chat: chat.into(),
            messages: messages.into_iter().map(schemas::Message::from).collect(),
        }),
    ))
}

async fn rename_chat(
    Inject(chat_service): Inject<dyn ChatService>,
    ExtractUser(current_user): ExtractUser,
    Path(chat_id): Path<String>,
    Json(rename): Json<RenameChat>,
) -> ApiResult<schemas::Chat> {
    let chat = chat_service
        .rename_chat(&current_user, &chat_id, rename.title)
        .await?;
    Ok((StatusCode::OK, Json(chat.into())))
}

async fn delete_chat(
    Inject(chat_service): Inject<dyn ChatService>,
    ExtractUser(current_user): ExtractUser,
    Path(chat_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    chat_service.delete_chat(&current_user, &chat_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn chat_messages(
    Inject(chat_service): Inject<dyn ChatService>,
    Path(chat_id): Path<String>,
    ExtractUser(current_user): ExtractUser,
) -> ApiResult<MessagesList> {
    let messages = chat_service.list_messages(&current_user, &chat_id).await?;

    Ok((
        StatusCode::OK,
        Json(MessagesList {
            messages: messages.into_iter().map(schemas::Message::from).collect(),
        }),
    ))
}

async fn post_message(
    Inject(chat_service): Inject<dyn ChatService>,
    ExtractUser(current_user): ExtractUser,
    Path(chat_id): Path<String>,
    Json(message): Json<CreateMessage>,
) -> ApiResult<schemas::Message> {
    let attachments = message
        .attachments
        .into_iter()
        .map(NewAttachment::from)
        .collect();
    let stored = chat_service
        .post_message(
            &current_user,
            &chat_id,
            message.role,
            message.parts,
            attachments,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(stored.into())))
}

async fn delete_message(
    Inject(chat_service): Inject<dyn ChatService>,
    ExtractUser(current_user): ExtractUser,
    Path(message_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    chat_service
        .delete_message(&current_user, &message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub mod schemas {
    use crate::core::traits;
    use crate::infrastructure::entities::{self, MessageRole};
    use crate::infrastructure::query::NullableJson;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize};

    #[derive(Deserialize, Debug, Default)]
    pub struct CreateChat {
        pub title: Option<String>,
        /// Parts of an opening user message.
        pub message: Option<serde_json::Value>,
    }

    #[derive(Deserialize, Debug)]
    pub struct RenameChat {
        pub title: Option<String>,
    }

    #[derive(Serialize, Debug)]
    pub struct Chat {
        pub id: String,
        pub title: Option<String>,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    impl From<entities::Chat> for Chat {
        fn from(chat: entities::Chat) -> Self {
            Chat {
                id: chat.id,
                title: chat.title,
                created_at: chat.created_at,
                updated_at: chat.updated_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ChatList {
        pub chats: Vec<Chat>,
    }

    #[derive(Serialize, Debug)]
    pub struct ChatDetail {
        pub chat: Chat,
        pub messages: Vec<Message>,
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
    }

    /// Absent `parts` stays SQL `NULL`; an explicit `null` is stored as JSON `null`.
    fn nullable_json<'de, D>(deserializer: D) -> Result<NullableJson, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Null => NullableJson::JsonNull,
            value => NullableJson::Value(value),
        })
    }

    fn default_role() -> MessageRole {
        MessageRole::User
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        #[serde(default = "default_role")]
        pub role: MessageRole,
        #[serde(default, deserialize_with = "nullable_json")]
        pub parts: NullableJson,
        #[serde(default)]
        pub attachments: Vec<NewAttachment>,
    }

    #[derive(Deserialize, Serialize, Debug)]
    pub struct NewAttachment {
        pub url: String,
        pub name: String,
        pub content_type: String,
    }

    impl From<NewAttachment> for traits::NewAttachment {
        fn from(attachment: NewAttachment) -> Self {
            traits::NewAttachment {
                url: attachment.url,
                name: attachment.name,
                content_type: attachment.content_type,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct Attachment {
        pub id: String,
        pub url: String,
        pub name: String,
        pub content_type: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Attachment> for Attachment {
        fn from(attachment: entities::Attachment) -> Self {
            Attachment {
                id: attachment.id,
                url: attachment.url,
                name: attachment.name,
                content_type: attachment.content_type,
                created_at: attachment.created_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct Message {
        pub chat_id: String,
        pub id: String,
        pub role: MessageRole,
        /// Omitted when the column is SQL `NULL`.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub parts: Option<serde_json::Value>,
        pub attachments: Vec<Attachment>,
        pub created_at: DateTime<Utc>,
    }

    impl From<(entities::Message, Vec<entities::Attachment>)> for Message {
        fn from((message, attachments): (entities::Message, Vec<entities::Attachment>)) -> Self {
            let parts = match message.parts() {
                NullableJson::DbNull => None,
                NullableJson::JsonNull => Some(serde_json::Value::Null),
                NullableJson::Value(value) => Some(value),
            };
            Message {
                chat_id: message.chat_id,
                id: message.id,
                role: message.role,
                parts,
                attachments: attachments.into_iter().map(Attachment::from).collect(),
                created_at: message.created_at,
            }
        }
    }
}
