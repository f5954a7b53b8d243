use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors produced while resolving or populating the entry index.
///
/// The first three variants are ordinary lookup outcomes and map one-to-one onto POSIX errors at
/// the filesystem boundary. [`IndexError::Unavailable`] covers every failure of the store itself
/// (statement preparation, execution, connection) and is treated as transient.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no such entry")]
    NotFound,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("entry already exists")]
    AlreadyExists,

    #[error("invalid entry name: {0:?}")]
    InvalidName(String),

    #[error("index unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
}
