use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("checkpoint not found: {location}")]
    NotFound { location: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}
