//! Error Module
//!
//! Defines error types and result types used throughout the chunk cache.

use thiserror::Error;

/// Main error type for the chunk cache
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChunkCacheError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Chunk not available on disk. Always absorbed by the manager.
    #[error("Cache miss: {0}")]
    CacheMiss(String),

    /// Chunk could not be persisted. Always absorbed by the manager.
    #[error("Cache write error: {0}")]
    CacheWriteError(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ChunkCacheError {
    /// Soft errors come from the disk layer and never reach a request's consumer
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ChunkCacheError::CacheMiss(_) | ChunkCacheError::CacheWriteError(_)
        )
    }
}

impl From<std::io::Error> for ChunkCacheError {
    fn from(err: std::io::Error) -> Self {
        ChunkCacheError::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ChunkCacheError {
    fn from(err: serde_yaml::Error) -> Self {
        ChunkCacheError::ConfigError(err.to_string())
    }
}

/// Result type alias for the chunk cache
pub type Result<T> = std::result::Result<T, ChunkCacheError>;
