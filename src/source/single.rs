use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::SystemTime;

use crate::format::RawZipEntry;

/// Source wrapping a single non-archive leaf entry whose bytes have
/// already been inflated, produced by partial-path search when the target
/// is a plain file inside a buffered archive.
pub(crate) struct SingleEntrySource {
    name: String,
    entry: RawZipEntry,
    bytes: Arc<Vec<u8>>,
    last_modified: SystemTime,
}

impl SingleEntrySource {
    pub fn new(entry: RawZipEntry, bytes: Vec<u8>, last_modified: SystemTime) -> SingleEntrySource {
        let name = entry
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        SingleEntrySource {
            name,
            entry,
            bytes: Arc::new(bytes),
            last_modified,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.entry.size
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    pub fn root_as_stream(&self) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(SharedBytes(self.bytes.clone())))
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}
