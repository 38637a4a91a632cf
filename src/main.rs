//! HTTP front end for the chat store

use chat_store::api;
use chat_store::core::services::{MyChatService, MyTodoService, MyUserService};
use chat_store::infrastructure::database::{DatabaseConnection, StoreConfig};
use chat_store::infrastructure::repositories::{
    DbChatRepository, DbTodoRepository, DbUserRepository,
};

use anyhow::{Context, anyhow};
use axum::Router;
use axum::http::{HeaderValue, Method};
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::{info, warn};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let config = StoreConfig::from_env()?;

    // migrate once up front, then let every request scope reuse the pool
    let connection = DatabaseConnection::connect(&config)
        .await
        .context("cannot open database")?;
    DatabaseConnection::set_shared_pool((*connection).clone());

    let provider = ServiceCollection::new()
        .add(DatabaseConnection::singleton())
        .add(DbUserRepository::scoped())
        .add(DbChatRepository::scoped())
        .add(DbTodoRepository::scoped())
        .add(MyUserService::scoped())
        .add(MyChatService::scoped())
        .add(MyTodoService::scoped())
        .build_provider()
        .map_err(|err| anyhow!("invalid service registrations: {err:?}"))?;

    let app = Router::new()
        .nest("/users", api::users::router())
        .nest("/chats", api::chats::router())
        .nest("/messages", api::chats::messages_router())
        .nest("/todos", api::todos::router())
        .layer(ServiceBuilder::new().layer(cors_layer(&config.cors_origins)))
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    info!("Shutting down...");

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin `{origin}`");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_origin(origins)
}
