use std::time::SystemTime;

use crate::format::RawZipEntry;

/// Synthetic source produced when a lookup lands on a directory entry
/// inside a buffered archive. It yields exactly that directory entry; it
/// has no payload to stream.
pub(crate) struct DirSource {
    name: String,
    entry: RawZipEntry,
    last_modified: SystemTime,
}

impl DirSource {
    pub fn new(entry: RawZipEntry, last_modified: SystemTime) -> DirSource {
        let name = entry
            .name
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        DirSource {
            name,
            entry,
            last_modified,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    pub fn entries(&self) -> Vec<RawZipEntry> {
        vec![self.entry.clone()]
    }
}
