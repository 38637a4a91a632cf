//! User registration and profile endpoints

use crate::api::users::schemas::{Register, UpdateProfile};
use crate::api::{ApiError, ApiResult, ExtractUser};
use crate::core::traits::UserService;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register))
        .route("/me", get(me).patch(update_me).delete(delete_me))
}

async fn register(
    Inject(user_service): Inject<dyn UserService>,
    Json(register): Json<Register>,
) -> ApiResult<schemas::User> {
    let user = user_service
        .register(register.name, register.email)
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn me(
    Inject(user_service): Inject<dyn UserService>,
    ExtractUser(current_user): ExtractUser,
) -> ApiResult<schemas::User> {
    let user = user_service.get_user(&current_user).await?;
    Ok((StatusCode::OK, Json(user.into())))
}

async fn update_me(
    Inject(user_service): Inject<dyn UserService>,
    ExtractUser(current_user): ExtractUser,
    Json(update): Json<UpdateProfile>,
) -> ApiResult<schemas::User> {
    let user = user_service
        .update_profile(&current_user, update.into())
        .await?;
    Ok((StatusCode::OK, Json(user.into())))
}

async fn delete_me(
    Inject(user_service): Inject<dyn UserService>,
    ExtractUser(current_user): ExtractUser,
) -> Result<StatusCode, ApiError> {
    user_service.delete_user(&current_user).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub mod schemas {
    use crate::core::traits::ProfileUpdate;
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize};

    #[derive(Deserialize, Debug)]
    pub struct Register {
        pub name: String,
        pub email: String,
    }

    /// Present keys are written, `null` clears the column.
    fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Some(Option::deserialize(deserializer)?))
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct UpdateProfile {
        pub name: Option<String>,
        #[serde(default, deserialize_with = "present")]
        pub image: Option<Option<String>>,
        #[serde(default, deserialize_with = "present")]
        pub background: Option<Option<String>>,
        #[serde(default, deserialize_with = "present")]
        pub bio: Option<Option<String>>,
    }

    impl From<UpdateProfile> for ProfileUpdate {
        fn from(update: UpdateProfile) -> Self {
            ProfileUpdate {
                name: update.name,
                image: update.image,
                background: update.background,
                bio: update.bio,
            }
        }
    }

    #[derive(Serialize, Debug)]
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

    impl From<entities::User> for User {
        fn from(user: entities::User) -> Self {
            User {
                id: user.id,
                name: user.name,
                email: user.email,
                email_verified: user.email_verified,
                image: user.image,
                background: user.background,
                bio: user.bio,
                created_at: user.created_at,
                updated_at: user.updated_at,
            }
        }
    }
}
