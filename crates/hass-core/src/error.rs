use thiserror::Error;

/// HASS 遥测统一错误类型
#[derive(Error, Debug)]
pub enum HassError {
    #[error("EventBus error: {0}")]
    EventBus(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Channel receive error: {0}")]
    ChannelReceive(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, HassError>;

impl From<anyhow::Error> for HassError {
    fn from(err: anyhow::Error) -> Self {
        HassError::Internal(err.to_string())
    }
}

impl<T> From<tokio::sync::broadcast::error::SendError<T>> for HassError {
    fn from(err: tokio::sync::broadcast::error::SendError<T>) -> Self {
        HassError::ChannelSend(err.to_string())
    }
}

impl From<tokio::sync::broadcast::error::RecvError> for HassError {
    fn from(err: tokio::sync::broadcast::error::RecvError) -> Self {
        HassError::ChannelReceive(err.to_string())
    }
}
