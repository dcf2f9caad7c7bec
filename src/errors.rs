use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("COMMAND_FAILED: {0}")]
    Command(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Human-readable failure delivered on the error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorEvent {
    #[error("no such link target for {name}={value}")]
    NoLinkTarget { name: String, value: String },
    #[error("multiple entries match {name}={value}")]
    AmbiguousLinkTarget { name: String, value: String },
    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("{command} returned an unexpected {output} result")]
    UnexpectedOutput { command: String, output: String },
    #[error("unable to read preferences: {0}")]
    Preferences(String),
}

impl ErrorEvent {
    pub fn command_failed(command: &str, error: impl std::fmt::Display) -> Self {
        Self::CommandFailed {
            command: command.to_string(),
            message: error.to_string(),
        }
    }
}
