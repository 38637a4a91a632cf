use crate::infrastructure::error::StoreError;
use async_trait::async_trait;
use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use log::error;
use serde::Serialize;

pub mod chats;
pub mod todos;
pub mod users;

const X_USER_ID: &str = "X-User-ID";
const MAX_USER_ID_LEN: usize = 128;

#[derive(Debug)]
pub struct ExtractUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        if let Some(user_id) = parts.headers.get(X_USER_ID) {
            let user_id = user_id
                .to_str()
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid user id"))?
                .trim();
            if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
                return Err((StatusCode::BAD_REQUEST, "invalid user id"));
            }
            Ok(ExtractUser(user_id.to_owned()))
        } else {
            Err((StatusCode::BAD_REQUEST, "`X-User-ID` header is missing"))
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

/// Store errors rendered as JSON responses.
#[derive(Debug)]
pub struct ApiError(pub StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::UniqueViolation { .. } => StatusCode::CONFLICT,
            StoreError::ForeignKeyViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::UnknownField { .. }
            | StoreError::InvalidSelector { .. }
            | StoreError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            StoreError::Migration(_) | StoreError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("{}", self.0);
            "internal error".to_owned()
        } else {
            self.0.to_string()
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<T>), ApiError>;
