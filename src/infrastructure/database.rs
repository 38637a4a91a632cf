//! Pooled SQLite connection

use crate::infrastructure::delegate::Delegate;
use crate::infrastructure::entities::{
    Account, Attachment, Authenticator, Chat, Message, Session, Todo, User, VerificationToken,
};
use crate::infrastructure::error::{StoreError, StoreResult};
use crate::infrastructure::schema::Model;
use anyhow::Context;
use di::inject;
use di::injectable;
use log::{error, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::env;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Mutex;

const DEFAULT_DATABASE_URL: &str = "sqlite://chat.db?mode=rwc";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:3000", "http://localhost:5173"];

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database: SqliteConnectOptions,
    pub max_connections: u32,
    pub bind_address: SocketAddr,
    pub cors_origins: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            database: SqliteConnectOptions::new()
                .filename("chat.db")
                .create_if_missing(true)
                .foreign_keys(true),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl StoreConfig {
    /// Reads `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `BIND_ADDRESS` and `CORS_ORIGINS`.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_owned());
        let database = SqliteConnectOptions::from_str(&database_url)
            .with_context(|| format!("invalid DATABASE_URL `{database_url}`"))?
            .foreign_keys(true);

        let max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("invalid DATABASE_MAX_CONNECTIONS `{value}`"))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };

        let bind_address = env::var("BIND_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_owned());
        let bind_address = bind_address
            .parse()
            .with_context(|| format!("invalid BIND_ADDRESS `{bind_address}`"))?;

        let cors_origins = match env::var("CORS_ORIGINS") {
            Ok(value) => value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect(),
            Err(_) => DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(StoreConfig {
            database,
            max_connections,
            bind_address,
            cors_origins,
        })
    }
}

/// Pool handed to DI-created connections instead of a fresh one from the environment.
static SHARED_POOL: Mutex<Option<SqlitePool>> = Mutex::new(None);

fn shared_pool() -> Option<SqlitePool> {
    SHARED_POOL.lock().ok().and_then(|pool| pool.clone())
}

pub struct DatabaseConnection {
    connection: SqlitePool,
}

#[injectable]
impl DatabaseConnection {
    #[inject]
    pub fn create() -> DatabaseConnection {
        if let Some(pool) = shared_pool() {
            return DatabaseConnection { connection: pool };
        }

        let config = StoreConfig::from_env().unwrap_or_else(|err| {
            error!("{err:#}, falling back to defaults");
            StoreConfig::default()
        });
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy_with(config.database);

        DatabaseConnection { connection: pool }
    }
}

impl DatabaseConnection {
    /// Opens the pool eagerly and applies pending migrations.
    pub async fn connect(config: &StoreConfig) -> StoreResult<DatabaseConnection> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.database.clone())
            .await
            .map_err(StoreError::Database)?;
        let connection = DatabaseConnection::from_pool(pool);
        connection.migrate().await?;
        Ok(connection)
    }

    pub fn from_pool(pool: SqlitePool) -> DatabaseConnection {
        DatabaseConnection { connection: pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!().run(&self.connection).await?;
        info!("database schema is up to date");
        Ok(())
    }

    /// Makes every DI-created `DatabaseConnection` share `pool`.
    pub fn set_shared_pool(pool: SqlitePool) {
        if let Ok(mut shared) = SHARED_POOL.lock() {
            *shared = Some(pool);
        }
    }

    pub fn clear_shared_pool() {
        if let Ok(mut shared) = SHARED_POOL.lock() {
            *shared = None;
        }
    }

    pub async fn begin(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        self.connection.begin().await.map_err(StoreError::Database)
    }

    pub fn delegate<M: Model>(&self) -> Delegate<'_, M> {
        Delegate::new(&self.connection)
    }

    pub fn user(&self) -> Delegate<'_, User> {
        self.delegate()
    }

    pub fn account(&self) -> Delegate<'_, Account> {
        self.delegate()
    }

    pub fn session(&self) -> Delegate<'_, Session> {
        self.delegate()
    }

    pub fn verification_token(&self) -> Delegate<'_, VerificationToken> {
        self.delegate()
    }

    pub fn authenticator(&self) -> Delegate<'_, Authenticator> {
        self.delegate()
    }

    pub fn todo(&self) -> Delegate<'_, Todo> {
        self.delegate()
    }

    pub fn chat(&self) -> Delegate<'_, Chat> {
        self.delegate()
    }

    pub fn message(&self) -> Delegate<'_, Message> {
        self.delegate()
    }

    pub fn attachment(&self) -> Delegate<'_, Attachment> {
        self.delegate()
    }
}

impl Deref for DatabaseConnection {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for DatabaseConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}
