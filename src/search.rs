//! Partial-path search.
//!
//! When a requested path does not exist on disk, the tail of the path may
//! point into an archive (possibly through several nesting levels, e.g.
//! `outer.jar/lib/inner.jar/a/b.txt`). The context walks ancestors to the
//! nearest existing file and hands the remaining suffix to [`find_entry`],
//! which descends through nested archive payloads until the suffix is
//! resolved.
//!
//! Nested payloads are not seekable, so every level is buffered into
//! memory before it is scanned; recursion re-scans from the buffer.

use std::io::Cursor;
use std::time::SystemTime;

use tracing::trace;

use crate::error::{VfsError, VfsResult};
use crate::format::{RawZipEntry, is_archive_name, parse_central_directory, read_entry};
use crate::source::{DirSource, SingleEntrySource, StreamSource, ZipSource};

/// Outcome of a partial-path search.
pub(crate) struct FoundSource {
    pub source: ZipSource,
    /// Set when the match is a directory entry: the owning context roots
    /// itself at this prefix (always `/`-terminated).
    pub root_entry_path: Option<String>,
    /// The first-level entry the search descended through, recorded for
    /// the canonical URL of the owning context.
    pub first_level_match: Option<String>,
}

/// Resolve `relative` against the archive held in `bytes`.
pub(crate) fn find_entry(bytes: Vec<u8>, relative: &str) -> VfsResult<FoundSource> {
    let mut first_level_match = None;
    let (source, root_entry_path) = descend(bytes, relative, &mut first_level_match, true)?;
    Ok(FoundSource {
        source,
        root_entry_path,
        first_level_match,
    })
}

fn descend(
    bytes: Vec<u8>,
    relative: &str,
    first_level_match: &mut Option<String>,
    top_level: bool,
) -> VfsResult<(ZipSource, Option<String>)> {
    let entries = parse_central_directory(&mut Cursor::new(bytes.as_slice()))
        .map_err(|e| VfsError::archive(e, relative.to_string()))?;
    let now = SystemTime::now();

    // Longest entry that is a whole-component prefix of the suffix.
    // Directories cannot be descended into, so only file entries qualify
    // as recursion candidates.
    let mut longest: Option<&RawZipEntry> = None;
    for entry in &entries {
        let name = entry.name.trim_end_matches('/');
        if !component_prefix(name, relative) {
            continue;
        }
        if name == relative {
            return exact_match(&bytes, entry, relative, now);
        }
        if !entry.is_directory
            && longest.is_none_or(|best| best.name.len() < name.len())
        {
            longest = Some(entry);
        }
    }

    let longest = longest
        .ok_or_else(|| VfsError::NotFound(format!("cannot find entry '{relative}'")))?;
    trace!(entry = %longest.name, suffix = %relative, "descending into nested archive");

    if top_level {
        *first_level_match = Some(longest.name.clone());
    }

    let payload = read_entry(&mut Cursor::new(bytes.as_slice()), longest)
        .map_err(|e| VfsError::archive(e, longest.name.clone()))?;
    let suffix = &relative[longest.name.len() + 1..];
    descend(payload, suffix, first_level_match, false)
}

fn exact_match(
    bytes: &[u8],
    entry: &RawZipEntry,
    relative: &str,
    now: SystemTime,
) -> VfsResult<(ZipSource, Option<String>)> {
    if entry.is_directory {
        let source = ZipSource::Dir(DirSource::new(entry.clone(), now));
        return Ok((source, Some(format!("{relative}/"))));
    }

    let payload = read_entry(&mut Cursor::new(bytes), entry)
        .map_err(|e| VfsError::archive(e, entry.name.clone()))?;

    if is_archive_name(&entry.name) {
        let source = StreamSource::new(entry.name.clone(), payload, now)
            .map_err(|e| VfsError::archive(e, entry.name.clone()))?;
        Ok((ZipSource::Stream(source), None))
    } else {
        let source = SingleEntrySource::new(entry.clone(), payload, now);
        Ok((ZipSource::Single(source), None))
    }
}

/// `prefix` matches `path` either exactly or up to a component boundary.
fn component_prefix(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::component_prefix;

    #[test]
    fn prefix_respects_component_boundaries() {
        assert!(component_prefix("lib/inner.jar", "lib/inner.jar"));
        assert!(component_prefix("lib/inner.jar", "lib/inner.jar/a/b.txt"));
        assert!(!component_prefix("lib/inner", "lib/inner.jar/a"));
        assert!(!component_prefix("lib/inner.jar/a/b.txt", "lib/inner.jar"));
    }
}
