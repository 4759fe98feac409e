//! Error taxonomy shared by every subsystem (spec.md §7).
//!
//! Only the kernel callback handler converts a [`StrataError`] into a bare
//! errno; everywhere else in the core, errors stay typed.

use thiserror::Error;

/// The error taxonomy from spec.md §7, one variant per kernel-facing code.
#[derive(Debug, Error)]
pub enum StrataError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    NoPermission(String),

    #[error("read-only filesystem: {0}")]
    ReadOnly(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("not a symlink: {0}")]
    NotSymlink(String),

    #[error("bad handle: {0}")]
    BadHandle(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Kernel-facing errno for this error, per spec.md §7's taxonomy table.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            StrataError::InvalidInput(_) => libc::EINVAL,
            StrataError::NotFound(_) => libc::ENOENT,
            StrataError::NoPermission(_) => libc::EACCES,
            StrataError::ReadOnly(_) => libc::EROFS,
            StrataError::NotDirectory(_) => libc::ENOTDIR,
            StrataError::NotEmpty(_) => libc::ENOTEMPTY,
            StrataError::Exists(_) => libc::EEXIST,
            StrataError::NotSymlink(_) => libc::EINVAL,
            StrataError::BadHandle(_) => libc::EBADF,
            StrataError::Internal(_) => libc::EIO,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        StrataError::Internal(msg.into())
    }
}

impl From<std::io::Error> for StrataError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => StrataError::NotFound(err.to_string()),
            PermissionDenied => StrataError::NoPermission(err.to_string()),
            AlreadyExists => StrataError::Exists(err.to_string()),
            _ => StrataError::Internal(err.to_string()),
        }
    }
}

pub type StrataResult<T> = Result<T, StrataError>;
