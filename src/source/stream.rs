use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult, ZipFormatError};
use crate::format::{RawZipEntry, parse_central_directory, read_entry};

/// In-memory source over the buffered bytes of a nested archive.
///
/// Nested archive payloads are not seekable inside their container, so the
/// whole archive is inflated into memory once and every enumeration or
/// entry read decodes from that buffer. The buffer never changes, so
/// `has_been_modified` is always false and `last_modified` stays at the
/// value captured when the archive was mounted.
pub(crate) struct StreamSource {
    name: String,
    buffer: Arc<Vec<u8>>,
    entries: Vec<RawZipEntry>,
    last_modified: SystemTime,
}

impl StreamSource {
    pub fn new(
        name: impl Into<String>,
        bytes: Vec<u8>,
        last_modified: SystemTime,
    ) -> Result<StreamSource, ZipFormatError> {
        let buffer = Arc::new(bytes);
        let entries = parse_central_directory(&mut Cursor::new(buffer.as_slice()))?;
        Ok(StreamSource {
            name: name.into(),
            buffer,
            entries,
            last_modified,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    pub fn entries(&self) -> Vec<RawZipEntry> {
        self.entries.clone()
    }

    pub fn open_entry(&self, entry: &RawZipEntry) -> VfsResult<Box<dyn Read + Send>> {
        let bytes = read_entry(&mut Cursor::new(self.buffer.as_slice()), entry)
            .map_err(|e| VfsError::archive(e, self.name.clone()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    pub fn root_as_stream(&self) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(SharedBytes(self.buffer.clone())))
    }
}

/// Shared byte buffer usable as a cursor backing.
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}
