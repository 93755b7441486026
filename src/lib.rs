//! A virtual filesystem over zip archives.
//!
//! Use [`ZipEntryContext`] to open an archive and navigate its entries as
//! a tree of [`Handler`]s. Archives stored inside other archives are
//! mounted recursively as sub-contexts, so `outer.jar/lib/inner.jar/a/b`
//! resolves like any other path. By default nested archives are held as
//! decoded in-memory buffers; with the `useCopy` option (or the
//! `ZIPVFS_FORCE_COPY` environment switch) they are extracted to a shared
//! temp directory instead.
//!
//! File-backed contexts watch the backing file's modification time and
//! rebuild their entry tree when it changes. Open descriptors are closed
//! by a background reaper after a grace period; the `noReaper` option
//! switches a context to synchronous closing.

pub mod config;
mod context;
mod error;
mod format;
mod handler;
mod index;
mod mount;
pub mod path;
mod search;
mod source;
mod temp;
#[cfg(test)]
pub(crate) mod testutil;

pub use config::{Options, VfsConfig};
pub use context::{ExceptionHandler, ZipEntryContext};
pub use error::{VfsError, VfsResult, ZipFormatError};
pub use format::is_archive_name;
pub use handler::Handler;
pub use temp::TempStore;
