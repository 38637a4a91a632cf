pub mod database;
pub mod delegate;
pub mod entities;
pub mod error;
pub mod query;
pub mod repositories;
pub mod schema;
pub mod traits;
