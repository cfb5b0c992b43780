use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("Local and remote state disagree: {0}")]
    Inconsistent(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl AppError {
    /// Wraps an adapter-level failure (connect, folder open, fetch) as a remote error.
    pub fn remote(err: anyhow::Error) -> Self {
        AppError::RemoteUnavailable(format!("{err:#}"))
    }
}
