//! Error types for Patchwright

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("hosting error: {0}")]
    Hosting(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("artifact too large: {size} bytes exceeds {limit} byte cap")]
    ArtifactTooLarge { size: u64, limit: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn hosting(message: impl Into<String>) -> Self {
        Self::Hosting(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
