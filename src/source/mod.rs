//! Byte-level sources over archives.
//!
//! Every context owns exactly one source. The variants cover the ways an
//! archive can be reached: a file on disk, a buffered nested archive, and
//! the two synthetic single-entry forms produced by partial-path search.

use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

mod dir;
mod file;
pub(crate) mod reaper;
mod single;
mod stream;

pub(crate) use dir::DirSource;
pub(crate) use file::{FileInner, FileSource};
pub(crate) use single::SingleEntrySource;
pub(crate) use stream::StreamSource;

use crate::error::{VfsError, VfsResult};
use crate::format::RawZipEntry;

pub(crate) enum ZipSource {
    File(FileSource),
    Stream(StreamSource),
    Dir(DirSource),
    Single(SingleEntrySource),
}

impl ZipSource {
    pub fn name(&self) -> &str {
        match self {
            ZipSource::File(s) => s.name(),
            ZipSource::Stream(s) => s.name(),
            ZipSource::Dir(s) => s.name(),
            ZipSource::Single(s) => s.name(),
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            ZipSource::File(s) => s.exists(),
            _ => true,
        }
    }

    pub fn size(&self) -> VfsResult<u64> {
        match self {
            ZipSource::File(s) => s.size(),
            ZipSource::Stream(s) => Ok(s.size()),
            ZipSource::Dir(_) => Ok(0),
            ZipSource::Single(s) => Ok(s.size()),
        }
    }

    pub fn last_modified(&self) -> SystemTime {
        match self {
            ZipSource::File(s) => s.last_modified(),
            ZipSource::Stream(s) => s.last_modified(),
            ZipSource::Dir(s) => s.last_modified(),
            ZipSource::Single(s) => s.last_modified(),
        }
    }

    /// Only a file on disk can change behind the engine's back; the
    /// buffered variants are immutable by construction.
    pub fn has_been_modified(&self) -> bool {
        match self {
            ZipSource::File(s) => s.has_been_modified(),
            _ => false,
        }
    }

    pub fn acquire(&self) -> VfsResult<SourceGuard> {
        match self {
            ZipSource::File(s) => s.acquire(),
            _ => Ok(SourceGuard::noop()),
        }
    }

    pub fn entries(&self) -> VfsResult<Vec<RawZipEntry>> {
        match self {
            ZipSource::File(s) => s.entries(),
            ZipSource::Stream(s) => Ok(s.entries()),
            ZipSource::Dir(s) => Ok(s.entries()),
            ZipSource::Single(_) => Ok(Vec::new()),
        }
    }

    pub fn open_entry(&self, entry: &RawZipEntry) -> VfsResult<Box<dyn Read + Send>> {
        match self {
            ZipSource::File(s) => s.open_entry(entry),
            ZipSource::Stream(s) => s.open_entry(entry),
            ZipSource::Dir(s) => Err(VfsError::StateInvariant(format!(
                "directory source '{}' has no entry data",
                s.name()
            ))),
            ZipSource::Single(s) => Err(VfsError::StateInvariant(format!(
                "single-entry source '{}' has no nested entries",
                s.name()
            ))),
        }
    }

    pub fn root_as_stream(&self) -> VfsResult<Box<dyn Read + Send>> {
        match self {
            ZipSource::File(s) => s.root_as_stream(),
            ZipSource::Stream(s) => Ok(s.root_as_stream()),
            ZipSource::Dir(_) => Ok(Box::new(std::io::empty())),
            ZipSource::Single(s) => Ok(s.root_as_stream()),
        }
    }

    pub fn delete(&self, grace: Duration) -> VfsResult<bool> {
        match self {
            ZipSource::File(s) => s.delete(grace),
            _ => Ok(false),
        }
    }

    pub fn close(&self) {
        if let ZipSource::File(s) = self {
            s.close()
        }
    }

    /// Whether the context root over this source is itself a leaf (true
    /// only for the single-entry form).
    pub fn is_leaf_root(&self) -> bool {
        matches!(self, ZipSource::Single(_))
    }

    #[cfg(test)]
    pub(crate) fn as_file(&self) -> Option<&FileSource> {
        match self {
            ZipSource::File(s) => Some(s),
            _ => None,
        }
    }
}

/// Refcount hold on a source; releases on drop so every acquire is paired
/// with a release on all exit paths.
pub(crate) struct SourceGuard {
    inner: Option<Arc<FileInner>>,
}

impl SourceGuard {
    fn noop() -> SourceGuard {
        SourceGuard { inner: None }
    }

    pub(crate) fn file(inner: Arc<FileInner>) -> SourceGuard {
        SourceGuard { inner: Some(inner) }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}
