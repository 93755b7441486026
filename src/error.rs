use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type VfsResult<T> = Result<T, VfsError>;

/// Errors reported by virtual file operations.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid archive '{1}'")]
    ArchiveFormat(#[source] ZipFormatError, String),

    #[error("I/O failure on '{1}'")]
    Io(#[source] std::io::Error, String),

    #[error("failed to write temporary file '{}'", .1.display())]
    TempIo(#[source] std::io::Error, PathBuf),

    #[error("state invariant violated: {0}")]
    StateInvariant(String),

    #[error("context for '{0}' is gone")]
    ContextGone(String),
}

/// Errors from the zip-format layer.
#[derive(Debug, thiserror::Error)]
pub enum ZipFormatError {
    #[error("no end-of-central-directory record found")]
    MissingEocd,

    #[error("invalid {0} record")]
    InvalidRecord(&'static str),

    #[error("unsupported compression method {0}")]
    UnsupportedCompression(u16),

    #[error("entry data out of bounds: {0}")]
    Truncated(String),

    #[error("read failed")]
    Read(#[from] std::io::Error),
}

impl VfsError {
    pub(crate) fn io(err: std::io::Error, what: impl Into<String>) -> VfsError {
        VfsError::Io(err, what.into())
    }

    pub(crate) fn archive(err: ZipFormatError, name: impl Into<String>) -> VfsError {
        VfsError::ArchiveFormat(err, name.into())
    }
}
