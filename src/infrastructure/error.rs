//! Error taxonomy for the persistence layer

use sqlx::error::ErrorKind;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no {model} record matched the given selector")]
    NotFound { model: &'static str },

    #[error("unique constraint violated on {model}: {detail}")]
    UniqueViolation { model: &'static str, detail: String },

    #[error("foreign key constraint violated on {model}: {detail}")]
    ForeignKeyViolation { model: &'static str, detail: String },

    #[error("{model} has no field named `{field}`")]
    UnknownField { model: &'static str, field: String },

    #[error("selector on {model} does not match a unique key: [{fields}]")]
    InvalidSelector { model: &'static str, fields: String },

    #[error("invalid argument for {model}: {reason}")]
    InvalidArgument { model: &'static str, reason: String },

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    /// Classifies a driver error raised while working on `model`.
    pub fn from_sqlx(model: &'static str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let detail = db_err.message().to_owned();
            match db_err.kind() {
                ErrorKind::UniqueViolation => {
                    return StoreError::UniqueViolation { model, detail };
                }
                ErrorKind::ForeignKeyViolation => {
                    return StoreError::ForeignKeyViolation { model, detail };
                }
                ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                    return StoreError::InvalidArgument {
                        model,
                        reason: detail,
                    };
                }
                _ => {}
            }
        }
        StoreError::Database(err)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from_sqlx("unknown", err)
    }
}
