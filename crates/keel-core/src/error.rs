use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid URN: {0}")]
    InvalidUrn(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
