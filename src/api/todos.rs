//! Todo endpoints

use crate::api::todos::schemas::{CreateTodo, ListTodos, TodoList, TodoStats, UpdateTodo};
use crate::api::{ApiError, ApiResult, ExtractUser};
use crate::core::traits::TodoService;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_todos).post(create_todo))
        .route("/stats", get(todo_stats))
        .route("/:id", patch(update_todo).delete(delete_todo))
}

async fn list_todos(
    Inject(todo_service): Inject<dyn TodoService>,
    ExtractUser(current_user): ExtractUser,
    Query(query): Query<ListTodos>,
) -> ApiResult<TodoList> {
    let todos = todo_service.list_todos(&current_user, query.status).await?;

    Ok((
        StatusCode::OK,
        Json(TodoList {
            todos: todos.into_iter().map(schemas::Todo::from).collect(),
        }),
    ))
}

async fn create_todo(
    Inject(todo_service): Inject<dyn TodoService>,
    ExtractUser(current_user): ExtractUser,
    Json(create): Json<CreateTodo>,
) -> ApiResult<schemas::Todo> {
    let todo = todo_service.create_todo(&current_user, create.title).await?;
    Ok((StatusCode::CREATED, Json(todo.into())))
}

async fn update_todo(
    Inject(todo_service): Inject<dyn TodoService>,
    ExtractUser(current_user): ExtractUser,
    Path(todo_id): Path<String>,
    Json(update): Json<UpdateTodo>,
) -> ApiResult<schemas::Todo> {
    let todo = todo_service
        .update_todo(&current_user, &todo_id, update.title, update.status)
        .await?;
    Ok((StatusCode::OK, Json(todo.into())))
}

async fn delete_todo(
    Inject(todo_service): Inject<dyn TodoService>,
    ExtractUser(current_user): ExtractUser,
    Path(todo_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    todo_service.delete_todo(&current_user, &todo_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn todo_stats(
    Inject(todo_service): Inject<dyn TodoService>,
    ExtractUser(current_user): ExtractUser,
) -> ApiResult<TodoStats> {
    let counts = todo_service.todo_stats(&current_user).await?;
    Ok((StatusCode::OK, Json(TodoStats::from(counts))))
}

pub mod schemas {
    use crate::infrastructure::entities::{self, TodoStatus};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Debug, Default)]
    pub struct ListTodos {
        pub status: Option<TodoStatus>,
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateTodo {
        pub title: String,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct UpdateTodo {
        pub title: Option<String>,
        pub status: Option<TodoStatus>,
    }

    #[derive(Serialize, Debug)]
    pub struct Todo {
        pub id: String,
        pub title: String,
        pub status: TodoStatus,
        pub completed: bool,
        pub done_at: Option<DateTime<Utc>>,
        pub cancelled_at: Option<DateTime<Utc>>,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    impl From<entities::Todo> for Todo {
        fn from(todo: entities::Todo) -> Self {
            Todo {
                id: todo.id,
                title: todo.title,
                status: todo.status,
                completed: todo.completed,
                done_at: todo.done_at,
                cancelled_at: todo.cancelled_at,
                created_at: todo.created_at,
                updated_at: todo.updated_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct TodoList {
        pub todos: Vec<Todo>,
    }

    #[derive(Serialize, Debug, Default, PartialEq, Eq)]
    pub struct TodoStats {
        pub pending: i64,
        pub finished: i64,
        pub cancelled: i64,
    }

    impl From<Vec<(TodoStatus, i64)>> for TodoStats {
        fn from(counts: Vec<(TodoStatus, i64)>) -> Self {
            let mut stats = TodoStats::default();
            for (status, count) in counts {
                match status {
                    TodoStatus::Pending => stats.pending += count,
                    TodoStatus::Finished => stats.finished += count,
                    TodoStatus::Cancelled => stats.cancelled += count,
                }
            }
            stats
        }
    }
}
