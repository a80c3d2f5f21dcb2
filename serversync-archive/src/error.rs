//! Error types for the archive crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("unsafe entry path: {0}")]
    UnsafePath(String),

    #[error("source directory not found: {0}")]
    MissingSource(String),
}
