use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Feed error: {0}")]
    Feed(String),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KeelError>;
