use libc::c_int;
use thiserror::Error;
use vramfs_gpu::BackendError;
use vramfs_index::IndexError;

/// Failure of a filesystem operation, converted to an errno only when replying to the kernel.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("permission denied")]
    PermissionDenied,
    #[error("file exists")]
    AlreadyExists,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("index temporarily unavailable")]
    TransientIndexFailure,
}

impl FsError {
    pub fn errno(self) -> c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::PermissionDenied => libc::EACCES,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::TransientIndexFailure => libc::EAGAIN,
        }
    }
}

impl From<IndexError> for FsError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound => FsError::NotFound,
            IndexError::NotADirectory => FsError::NotADirectory,
            IndexError::IsADirectory => FsError::IsADirectory,
            IndexError::AlreadyExists => FsError::AlreadyExists,
            IndexError::InvalidName(_) => FsError::InvalidArgument,
            IndexError::Unavailable(_) => FsError::TransientIndexFailure,
        }
    }
}

/// Failure to bring the filesystem up. Always fatal for the mount.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to create entry index")]
    Index(#[source] IndexError),

    #[error("GPU backend unavailable")]
    Backend(#[from] BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::NotADirectory.errno(), libc::ENOTDIR);
        assert_eq!(FsError::IsADirectory.errno(), libc::EISDIR);
        assert_eq!(FsError::PermissionDenied.errno(), libc::EACCES);
        assert_eq!(FsError::TransientIndexFailure.errno(), libc::EAGAIN);
    }

    #[test]
    fn index_errors_keep_their_meaning() {
        assert_eq!(FsError::from(IndexError::NotFound), FsError::NotFound);
        assert_eq!(FsError::from(IndexError::NotADirectory), FsError::NotADirectory);
        assert_eq!(FsError::from(IndexError::IsADirectory), FsError::IsADirectory);
        let unavailable = IndexError::Unavailable(rusqlite::Error::InvalidQuery);
        assert_eq!(FsError::from(unavailable), FsError::TransientIndexFailure);
    }
}
