//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Namespace is mounted read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Node, namespace or descriptor is in use.
    ///
    /// The only retryable error.
    #[error("resource busy: {0}")]
    Busy(String),

    /// No free vnode slot or allocation failure.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Descriptor table is full.
    #[error("too many open files")]
    TooManyOpenFiles,

    /// Descriptor is not open, or has the wrong kind.
    #[error("bad file descriptor: {0}")]
    BadDescriptor(i32),

    /// Invalid argument or path.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// Link or rename across namespaces.
    #[error("cross-device link")]
    CrossDevice,

    /// Too many symbolic links.
    #[error("too many levels of symbolic links")]
    TooManySymlinks,

    /// File name or path too long.
    #[error("file name too long")]
    NameTooLong,

    /// Backend has no space left.
    #[error("no space left on device")]
    NoSpace,

    /// No filesystem registered under this name.
    #[error("unknown filesystem: {0}")]
    UnknownFilesystem(String),

    /// Backend does not implement the operation.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// I/O error reported by the backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal consistency failure.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a Busy error.
    pub fn busy(what: impl Into<String>) -> Self {
        Self::Busy(what.into())
    }

    /// Create an OutOfMemory error.
    pub fn out_of_memory(what: impl Into<String>) -> Self {
        Self::OutOfMemory(what.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true if the caller is expected to retry after a short delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VfsError::Busy(_))
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::ReadOnly => {
                io::Error::new(io::ErrorKind::ReadOnlyFilesystem, "filesystem is read-only")
            }
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::Busy(msg) => io::Error::new(io::ErrorKind::ResourceBusy, msg),
            VfsError::OutOfMemory(msg) => io::Error::new(io::ErrorKind::OutOfMemory, msg),
            VfsError::TooManyOpenFiles => io::Error::other("too many open files"),
            VfsError::BadDescriptor(fd) => io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bad file descriptor: {}", fd),
            ),
            VfsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::NotASymlink(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::CrossDevice => io::Error::new(io::ErrorKind::CrossesDevices, "cross-device link"),
            VfsError::TooManySymlinks => io::Error::other("too many levels of symbolic links"),
            VfsError::NameTooLong => {
                io::Error::new(io::ErrorKind::InvalidFilename, "file name too long")
            }
            VfsError::NoSpace => io::Error::new(io::ErrorKind::StorageFull, "no space left on device"),
            VfsError::UnknownFilesystem(name) => io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown filesystem: {}", name),
            ),
            VfsError::NotSupported(op) => io::Error::new(io::ErrorKind::Unsupported, op),
            VfsError::Io(e) => e,
            VfsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
