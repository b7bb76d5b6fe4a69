//! Error taxonomy for an import run.
//!
//! `ImportError` variants are fatal and end the run with a non-zero exit code.
//! `FileError` only ever affects a single source file, which is skipped.

use std::path::PathBuf;

/// Fatal errors that abort an import
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Failed to connect to database: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Failed to list directory {}: {source}", .path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed, transaction rolled back: {0:#}")]
    Write(#[source] anyhow::Error),
}

/// Errors that cause a single source file to be skipped
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("Failed to read file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid rate document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid detailpriority for item {item_id}: expected an integer or null, got {value}")]
    DetailPriority {
        item_id: i64,
        value: serde_json::Value,
    },
}
