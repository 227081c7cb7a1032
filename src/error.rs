use std::path::PathBuf;
use thiserror::Error;

// 词典存储错误
#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("Entry with ID {0} already exists")]
    DuplicateId(String),

    #[error("Entry with ID {0} not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid lexicon document: {0}")]
    Json(#[from] serde_json::Error),
}

// 音频关联库错误
#[derive(Debug, Error)]
pub enum AudioError {
    // 文件无法打开或读取
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // 无法读取容器层面的音频信息
    #[error("Unsupported audio format {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("Audio record {0} not found")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl AudioError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AudioError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AudioError::UnsupportedFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
