use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::format::{
    EntryDecoder, RawZipEntry, decoder_for, entry_data_offset, parse_central_directory,
};

use super::SourceGuard;
use super::reaper;

/// How long an idle descriptor survives before the reaper closes it.
pub(crate) const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Random-access source over an archive file on disk.
///
/// The descriptor is held open while streams or enumerations are
/// outstanding (tracked by a refcount). In reaper mode an idle descriptor
/// is closed by the background sweeper once the grace period passes; with
/// `noReaper` it is closed as soon as the refcount drains.
pub(crate) struct FileSource {
    name: String,
    auto_clean: bool,
    inner: Arc<FileInner>,
}

pub(crate) struct FileInner {
    pub(crate) path: PathBuf,
    no_reaper: bool,
    grace: Duration,
    refcount: AtomicUsize,
    state: Mutex<FileState>,
    /// Central-directory enumerations performed; observed by tests to
    /// verify single-flight initialization.
    pub(crate) enumerations: AtomicUsize,
}

struct FileState {
    file: Option<File>,
    entries: Option<Arc<Vec<RawZipEntry>>>,
    cached_mtime: Option<SystemTime>,
    last_release: Instant,
}

impl FileSource {
    pub fn new(path: &Path, auto_clean: bool, no_reaper: bool) -> FileSource {
        FileSource::with_grace(path, auto_clean, no_reaper, DEFAULT_GRACE)
    }

    pub fn with_grace(
        path: &Path,
        auto_clean: bool,
        no_reaper: bool,
        grace: Duration,
    ) -> FileSource {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cached_mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        let inner = Arc::new(FileInner {
            path: path.to_path_buf(),
            no_reaper,
            grace,
            refcount: AtomicUsize::new(0),
            state: Mutex::new(FileState {
                file: None,
                entries: None,
                cached_mtime,
                last_release: Instant::now(),
            }),
            enumerations: AtomicUsize::new(0),
        });
        if !no_reaper {
            reaper::register(&inner);
        }
        FileSource {
            name,
            auto_clean,
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> bool {
        self.inner.path.exists()
    }

    pub fn size(&self) -> VfsResult<u64> {
        std::fs::metadata(&self.inner.path)
            .map(|m| m.len())
            .map_err(|e| VfsError::io(e, self.inner.path.display().to_string()))
    }

    pub fn last_modified(&self) -> SystemTime {
        std::fs::metadata(&self.inner.path)
            .and_then(|m| m.modified())
            .unwrap_or(UNIX_EPOCH)
    }

    /// Compare the file's mtime against the one seen last time. A change
    /// invalidates the cached central directory and drops the descriptor
    /// so the next enumeration reopens the file.
    pub fn has_been_modified(&self) -> bool {
        let current = std::fs::metadata(&self.inner.path)
            .and_then(|m| m.modified())
            .ok();
        let mut state = self.inner.state.lock().unwrap();
        if state.cached_mtime == current && current.is_some() {
            return false;
        }
        debug!(path = %self.inner.path.display(), "archive file changed on disk");
        state.cached_mtime = current;
        state.file = None;
        state.entries = None;
        true
    }

    pub fn acquire(&self) -> VfsResult<SourceGuard> {
        self.inner.refcount.fetch_add(1, Ordering::SeqCst);
        Ok(SourceGuard::file(self.inner.clone()))
    }

    pub fn entries(&self) -> VfsResult<Vec<RawZipEntry>> {
        let mut state = self.inner.state.lock().unwrap();
        if state.entries.is_none() {
            let file = match state.file.take() {
                Some(f) => f,
                None => File::open(&self.inner.path)
                    .map_err(|e| VfsError::io(e, self.inner.path.display().to_string()))?,
            };
            let mut reader = BufReader::new(file);
            self.inner.enumerations.fetch_add(1, Ordering::SeqCst);
            let parsed = parse_central_directory(&mut reader)
                .map_err(|e| VfsError::archive(e, self.name.clone()))?;
            state.file = Some(reader.into_inner());
            state.entries = Some(Arc::new(parsed));
        }
        Ok(state.entries.as_ref().unwrap().to_vec())
    }

    /// Open a decompressing stream over one entry.
    ///
    /// The stream gets its own file handle (positioned reads must not share
    /// a cursor with other streams) but holds a refcount guard so the
    /// reaper and `delete` see it as an outstanding use of the source.
    pub fn open_entry(&self, entry: &RawZipEntry) -> VfsResult<Box<dyn Read + Send>> {
        let guard = self.acquire()?;
        let file = File::open(&self.inner.path)
            .map_err(|e| VfsError::io(e, self.inner.path.display().to_string()))?;
        let mut reader = BufReader::new(file);
        let offset = entry_data_offset(&mut reader, entry)
            .map_err(|e| VfsError::archive(e, self.name.clone()))?;
        std::io::Seek::seek(&mut reader, std::io::SeekFrom::Start(offset))
            .map_err(|e| VfsError::io(e, self.inner.path.display().to_string()))?;
        let decoder = decoder_for(entry, reader.take(entry.compressed_size))
            .map_err(|e| VfsError::archive(e, self.name.clone()))?;
        Ok(Box::new(EntryStream {
            decoder,
            _guard: guard,
        }))
    }

    /// Stream over the raw archive file itself.
    pub fn root_as_stream(&self) -> VfsResult<Box<dyn Read + Send>> {
        let guard = self.acquire()?;
        let file = File::open(&self.inner.path)
            .map_err(|e| VfsError::io(e, self.inner.path.display().to_string()))?;
        let len = self.size()?;
        Ok(Box::new(EntryStream {
            decoder: EntryDecoder::Stored(BufReader::new(file).take(len)),
            _guard: guard,
        }))
    }

    /// Wait up to `grace` for outstanding uses to drain, then unlink.
    pub fn delete(&self, grace: Duration) -> VfsResult<bool> {
        let deadline = Instant::now() + grace;
        while self.inner.refcount.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        {
            let mut state = self.inner.state.lock().unwrap();
            state.file = None;
            state.entries = None;
        }
        Ok(std::fs::remove_file(&self.inner.path).is_ok())
    }

    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.file = None;
        state.entries = None;
        drop(state);
        if self.auto_clean {
            let _ = std::fs::remove_file(&self.inner.path);
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<FileInner> {
        &self.inner
    }
}

impl FileInner {
    pub(crate) fn release(&self) {
        let previous = self.refcount.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0);
        let mut state = self.state.lock().unwrap();
        state.last_release = Instant::now();
        if previous == 1 && self.no_reaper {
            state.file = None;
        }
    }

    /// Close the descriptor if the source has been idle past its grace
    /// period. Called by the reaper thread; never touches a source with a
    /// live refcount.
    pub(crate) fn reap(&self) {
        if self.refcount.load(Ordering::SeqCst) > 0 {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.file.is_some()
            && self.refcount.load(Ordering::SeqCst) == 0
            && state.last_release.elapsed() >= self.grace
        {
            debug!(path = %self.path.display(), "reaper closing idle descriptor");
            state.file = None;
        }
    }

    #[cfg(test)]
    pub(crate) fn descriptor_open(&self) -> bool {
        self.state.lock().unwrap().file.is_some()
    }

    #[cfg(test)]
    pub(crate) fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }
}

struct EntryStream {
    decoder: EntryDecoder<std::io::Take<BufReader<File>>>,
    _guard: SourceGuard,
}

impl Read for EntryStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.decoder.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_zip;

    #[test]
    fn entry_streams_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_zip(&path, &[("x.txt", b"hello"), ("dir/", b"")]);

        let source = FileSource::new(&path, false, true);
        let guard = source.acquire().unwrap();
        let entries = source.entries().unwrap();
        let x = entries.iter().find(|e| e.name == "x.txt").unwrap();

        let mut out = Vec::new();
        source.open_entry(x).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
        drop(guard);
    }

    #[test]
    fn synchronous_mode_closes_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_zip(&path, &[("x.txt", b"hello")]);

        let source = FileSource::new(&path, false, true);
        let guard = source.acquire().unwrap();
        source.entries().unwrap();
        assert!(source.inner().descriptor_open());
        drop(guard);
        assert!(!source.inner().descriptor_open());
        assert_eq!(source.inner().refcount(), 0);
    }

    #[test]
    fn reaper_closes_idle_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_zip(&path, &[("x.txt", b"hello")]);

        let source =
            FileSource::with_grace(&path, false, false, Duration::from_millis(100));
        let guard = source.acquire().unwrap();
        source.entries().unwrap();
        drop(guard);
        assert!(source.inner().descriptor_open());

        // Grace 100ms plus one sweep period, with slack for a slow runner.
        std::thread::sleep(Duration::from_millis(800));
        assert!(!source.inner().descriptor_open());

        // A later enumeration reopens transparently.
        assert_eq!(source.entries().unwrap().len(), 1);
    }

    #[test]
    fn modification_invalidates_cached_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_zip(&path, &[("x.txt", b"hello")]);

        let source = FileSource::new(&path, false, true);
        assert!(!source.has_been_modified());
        assert_eq!(source.entries().unwrap().len(), 1);

        write_zip(&path, &[("x.txt", b"hello"), ("y.txt", b"bye")]);
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
        drop(f);

        assert!(source.has_been_modified());
        assert!(!source.has_been_modified());
        assert_eq!(source.entries().unwrap().len(), 2);
    }

    #[test]
    fn delete_waits_for_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_zip(&path, &[("x.txt", b"hello")]);

        let source = FileSource::new(&path, false, true);
        assert!(source.delete(Duration::from_millis(50)).unwrap());
        assert!(!path.exists());
        assert!(!source.exists());
    }
}
