use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Error taxonomy shared by the store, the policy engine, and the API
/// boundary. Validation/Policy/NotFound are reported only to the originator;
/// Persistence fails the triggering operation without touching anything else.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Policy(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage error: {0}")]
    Persistence(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        Self::Policy(msg.into())
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(format!("serialization: {e}"))
    }
}
