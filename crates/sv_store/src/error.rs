use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Column {column}: {reason}")]
    Column { column: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Decode(#[from] sv_proto::DecodeError),

    #[error(transparent)]
    Proto(#[from] sv_proto::ProtoError),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Session {0} is closed; write not saved")]
    Retired(String),
}
