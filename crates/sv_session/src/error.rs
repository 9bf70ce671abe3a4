use sv_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session already running: {0}")]
    AlreadyRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] anyhow::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session task failed: {0}")]
    Task(String),
}
