//! The archive context: one backing source exposed as a handler tree.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::{self, Options, VfsConfig};
use crate::error::{VfsError, VfsResult};
use crate::format::is_archive_name;
use crate::handler::Handler;
use crate::index::{CertCapture, EntryIndex, EntryInfo};
use crate::mount;
use crate::path::{local_join, split_parent_child};
use crate::search;
use crate::source::{FileSource, StreamSource, ZipSource};
use crate::temp::{TempInfo, TempStore};

/// Callback invoked when building the entry tree fails; lets a consumer
/// downgrade a corrupt archive to a warning instead of a hard error.
pub trait ExceptionHandler: Send + Sync {
    fn handle_init_error(&self, error: &VfsError, archive_name: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    NotInitialized,
    Initializing,
    Initialized,
}

/// A rooted view over one zip archive.
///
/// The context owns the byte source, the entry index, and any mounted
/// sub-contexts (through the delegating handlers in its index). Entries
/// are indexed lazily on first query; a change to the backing file clears
/// and rebuilds the index while preserving the root handler.
pub struct ZipEntryContext {
    uri: String,
    name: String,
    options: Options,
    config: Arc<VfsConfig>,
    auto_clean: bool,
    peer: Option<Weak<Handler>>,
    exception_handler: RwLock<Option<Arc<dyn ExceptionHandler>>>,
    temp_store: RwLock<Option<Arc<dyn TempStore>>>,
    /// Backing file; `None` for stream-mounted contexts.
    file_path: Option<PathBuf>,
    /// Prefix inside the archive treated as this context's root. Either
    /// empty or `/`-terminated.
    root_entry_path: Mutex<String>,
    zip_source: Mutex<Option<Arc<ZipSource>>>,
    real_url: Mutex<Option<String>>,
    index: EntryIndex,
    init: Mutex<InitState>,
    temp_infos: Mutex<HashMap<String, TempInfo>>,
    this: Weak<ZipEntryContext>,
}

impl ZipEntryContext {
    /// Open a context over an archive addressed by a path or URL.
    ///
    /// Accepts plain paths (`/data/outer.jar`), `file:` / `jar:file:` URLs
    /// with an optional `!/` entry separator, and paths whose tail points
    /// through nested archives (`/data/outer.jar/lib/inner.jar/a`); the
    /// non-existing tail is resolved by searching the nearest existing
    /// file. Query parameters (`?useCopy=true`) become context options.
    pub fn open(url: impl AsRef<str>, options: Options) -> VfsResult<Arc<ZipEntryContext>> {
        ZipEntryContext::open_with_config(url, options, VfsConfig::global())
    }

    /// [`open`](ZipEntryContext::open) with an explicit configuration
    /// snapshot instead of the process-wide one.
    pub fn open_with_config(
        url: impl AsRef<str>,
        options: Options,
        config: Arc<VfsConfig>,
    ) -> VfsResult<Arc<ZipEntryContext>> {
        let raw = url.as_ref();
        if raw.is_empty() {
            return Err(VfsError::BadArgument("empty context url".into()));
        }
        if let Some((_, query)) = raw.split_once('?') {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((k, v)) => options.set(k, v),
                    None => options.set(pair, "true"),
                }
            }
        }
        let uri = normalize_uri(raw);
        let (file_path, root_entry_path) = init_root_and_path(raw);
        Ok(ZipEntryContext::build(
            uri,
            options,
            config,
            false,
            None,
            Some(file_path),
            root_entry_path,
            None,
        ))
    }

    /// Mount a sub-context over an extracted archive file. Used for nested
    /// archives in copy mode; `auto_clean` ties the temp file's life to
    /// the context.
    pub(crate) fn mount_file(
        uri: String,
        peer: &Arc<Handler>,
        file: &Path,
        config: Arc<VfsConfig>,
        options: Options,
    ) -> Arc<ZipEntryContext> {
        ZipEntryContext::build(
            uri,
            options,
            config,
            true,
            Some(peer),
            Some(file.to_path_buf()),
            String::new(),
            None,
        )
    }

    /// Mount a sub-context over a buffered nested archive.
    ///
    /// The mounted tree's `last_modified` is fixed at the time of mount;
    /// it does not track later changes to the containing archive.
    pub(crate) fn mount_stream(
        uri: String,
        peer: &Arc<Handler>,
        source: StreamSource,
        config: Arc<VfsConfig>,
        options: Options,
    ) -> Arc<ZipEntryContext> {
        ZipEntryContext::build(
            uri,
            options,
            config,
            false,
            Some(peer),
            None,
            String::new(),
            Some(ZipSource::Stream(source)),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        uri: String,
        options: Options,
        config: Arc<VfsConfig>,
        auto_clean: bool,
        peer: Option<&Arc<Handler>>,
        file_path: Option<PathBuf>,
        root_entry_path: String,
        source: Option<ZipSource>,
    ) -> Arc<ZipEntryContext> {
        let name = derive_name(&uri);
        Arc::new_cyclic(|weak: &Weak<ZipEntryContext>| {
            let root = Handler::zip_entry(weak.clone(), None, &name);
            ZipEntryContext {
                uri,
                name,
                options,
                config,
                auto_clean,
                peer: peer.map(Arc::downgrade),
                exception_handler: RwLock::new(None),
                temp_store: RwLock::new(None),
                file_path,
                root_entry_path: Mutex::new(root_entry_path),
                zip_source: Mutex::new(source.map(Arc::new)),
                real_url: Mutex::new(None),
                index: EntryIndex::new(EntryInfo::new(root, None)),
                init: Mutex::new(InitState::NotInitialized),
                temp_infos: Mutex::new(HashMap::new()),
                this: weak.clone(),
            }
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// This context's root handler.
    pub fn root(&self) -> Arc<Handler> {
        self.index.root().handler()
    }

    /// Canonical `jar:file:…!/` URL of the backing archive.
    pub fn real_url(&self) -> VfsResult<String> {
        self.real_url_for("")
    }

    pub fn set_exception_handler(&self, handler: Option<Arc<dyn ExceptionHandler>>) {
        *self.exception_handler.write().unwrap() = handler;
    }

    /// The installed handler, or the peer context's when none is.
    pub fn exception_handler(&self) -> Option<Arc<dyn ExceptionHandler>> {
        if let Some(eh) = self.exception_handler.read().unwrap().clone() {
            return Some(eh);
        }
        self.peer_context().and_then(|ctx| ctx.exception_handler())
    }

    pub fn set_temp_store(&self, store: Option<Arc<dyn TempStore>>) {
        *self.temp_store.write().unwrap() = store;
    }

    pub fn temp_store(&self) -> Option<Arc<dyn TempStore>> {
        if let Some(store) = self.temp_store.read().unwrap().clone() {
            return Some(store);
        }
        self.peer_context().and_then(|ctx| ctx.temp_store())
    }

    /// Options with the peer context's as the base layer, overridden by
    /// this context's own.
    pub fn aggregated_options(&self) -> Options {
        let aggregated = Options::new();
        if let Some(peer_ctx) = self.peer_context() {
            aggregated.merge(&peer_ctx.options);
        }
        aggregated.merge(&self.options);
        aggregated
    }

    pub(crate) fn config(&self) -> &Arc<VfsConfig> {
        &self.config
    }

    pub(crate) fn weak(&self) -> Weak<ZipEntryContext> {
        self.this.clone()
    }

    pub(crate) fn peer_handler(&self) -> Option<Arc<Handler>> {
        self.peer.as_ref()?.upgrade()
    }

    pub(crate) fn peer_context(&self) -> Option<Arc<ZipEntryContext>> {
        self.peer_handler()?.owning_context()
    }

    pub(crate) fn child_uri(&self, local: &str) -> String {
        format!("{}/{}", self.uri.trim_end_matches('/'), local)
    }

    /// This context's URI relative to `peer_ctx`'s, extended with an entry
    /// name. Keys the extraction registry so a re-mount of the same nested
    /// archive reuses the extracted file.
    pub(crate) fn peer_relative_path(&self, peer_ctx: &ZipEntryContext, entry_name: &str) -> String {
        let own = strip_scheme(&self.uri);
        let peer = strip_scheme(&peer_ctx.uri);
        format!("{}{}", own.strip_prefix(peer).unwrap_or(own), entry_name)
    }

    pub(crate) fn temp_info_file(&self, key: &str) -> Option<PathBuf> {
        self.temp_infos
            .lock()
            .unwrap()
            .get(key)
            .filter(|info| info.is_valid())
            .map(|info| info.file.clone())
    }

    pub(crate) fn add_temp_info(&self, key: String, info: TempInfo) {
        self.temp_infos.lock().unwrap().insert(key, info);
    }

    /// The backing source, created on first touch.
    pub(crate) fn zip_source(&self) -> VfsResult<Arc<ZipSource>> {
        let mut guard = self.zip_source.lock().unwrap();
        if let Some(source) = guard.as_ref() {
            return Ok(source.clone());
        }
        let source = Arc::new(self.create_zip_source()?);
        *guard = Some(source.clone());
        Ok(source)
    }

    fn create_zip_source(&self) -> VfsResult<ZipSource> {
        let path = self.file_path.clone().ok_or_else(|| {
            VfsError::StateInvariant(format!("context '{}' has no backing path", self.name))
        })?;

        if path.is_file() {
            let aggregated = self.aggregated_options();
            let no_reaper =
                self.config.force_no_reaper || aggregated.get_bool(config::NO_REAPER);
            *self.real_url.lock().unwrap() = Some(jar_url(&path, None));
            return Ok(ZipSource::File(FileSource::new(
                &path,
                self.auto_clean,
                no_reaper,
            )));
        }

        // The path has no file behind it: the tail must address entries
        // inside an archive further up. Walk to the nearest existing
        // ancestor and resolve the remaining suffix through its payload.
        let mut relative = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                VfsError::BadArgument(format!("invalid archive path '{}'", path.display()))
            })?;
        let mut file = None;
        let mut current = path.clone();
        while let Some(parent) = current.parent().map(Path::to_path_buf) {
            if parent.as_os_str().is_empty() {
                break;
            }
            if parent.exists() {
                if parent.is_file() {
                    file = Some(parent);
                }
                break;
            }
            match parent.file_name() {
                Some(n) => relative = format!("{}/{}", n.to_string_lossy(), relative),
                None => break,
            }
            current = parent;
        }
        let file = file.ok_or_else(|| {
            VfsError::NotFound(format!("no archive file on the path to '{}'", path.display()))
        })?;

        debug!(file = %file.display(), relative = %relative, "resolving partial path");
        let bytes =
            std::fs::read(&file).map_err(|e| VfsError::io(e, file.display().to_string()))?;
        let found = search::find_entry(bytes, &relative)?;
        if let Some(root_entry_path) = found.root_entry_path {
            *self.root_entry_path.lock().unwrap() = root_entry_path;
        }
        *self.real_url.lock().unwrap() =
            Some(jar_url(&file, found.first_level_match.as_deref()));
        Ok(found.source)
    }

    /// Build the entry tree: select entries under the context's root
    /// prefix, order them so parents precede children, then install a
    /// handler per entry, mounting nested archives as sub-contexts.
    fn init_entries(&self) -> VfsResult<()> {
        let source = self.zip_source()?;
        let _guard = source.acquire()?;
        let prefix = self.root_entry_path.lock().unwrap().clone();

        let mut relevant: Vec<_> = source
            .entries()?
            .into_iter()
            .filter(|entry| entry.name.starts_with(&prefix))
            .collect();
        relevant.sort_by(|a, b| a.name.cmp(&b.name));

        let use_copy =
            self.config.force_copy || self.aggregated_options().get_bool(config::USE_COPY);

        for entry in relevant {
            let local = entry.name[prefix.len()..].to_string();
            let (parent_path, name) = split_parent_child(&local);

            if name.is_empty() {
                // The root prefix itself has an explicit entry.
                self.index.root().set_raw(Some(entry));
                continue;
            }
            let parent_path = parent_path.unwrap_or("");
            let parent_info = match self.index.get(parent_path) {
                Some(info) => info,
                None => self.make_dummy_parent(parent_path)?,
            };
            let parent_handler = parent_info.handler();

            if !entry.is_directory && is_archive_name(&entry.name) {
                match mount::mount_nested(self, &parent_handler, name, &entry, &source, use_copy)
                {
                    Ok(delegator) => {
                        self.index.insert(
                            delegator.local_path().to_string(),
                            EntryInfo::new(delegator.clone(), Some(entry)),
                        );
                        parent_info.add_child(delegator);
                        continue;
                    }
                    Err(err) if !use_copy => {
                        // A corrupt nested archive must not take down
                        // enumeration of its container; expose it as a
                        // plain leaf instead.
                        match self.exception_handler() {
                            Some(eh) => eh.handle_init_error(&err, &entry.name),
                            None => warn!(
                                entry = %entry.name,
                                error = %err,
                                "failed to mount nested archive, exposing as plain leaf"
                            ),
                        }
                    }
                    Err(err) => return Err(err),
                }
            }

            let handler = Handler::zip_entry(self.this.clone(), Some(&parent_handler), name);
            self.index.insert(
                handler.local_path().to_string(),
                EntryInfo::new(handler.clone(), Some(entry)),
            );
            parent_info.add_child(handler);
        }
        Ok(())
    }

    /// Archives often omit directory entries; synthesize the missing
    /// parent chain. Synthesized entries have no raw entry.
    fn make_dummy_parent(&self, parent_path: &str) -> VfsResult<Arc<EntryInfo>> {
        let (grand, name) = split_parent_child(parent_path);
        let grand = grand.ok_or_else(|| {
            VfsError::StateInvariant("root entry missing from index".into())
        })?;
        let grand_info = match self.index.get(grand) {
            Some(info) => info,
            None => self.make_dummy_parent(grand)?,
        };
        let handler = Handler::zip_entry(self.this.clone(), Some(&grand_info.handler()), name);
        let info = EntryInfo::new(handler.clone(), None);
        self.index.insert(parent_path.to_string(), info.clone());
        grand_info.add_child(handler);
        Ok(info)
    }

    /// Initialize once. Failures reset the state so a later attempt can
    /// succeed; with an exception handler installed the failure is routed
    /// there and swallowed.
    pub(crate) fn ensure_entries(&self) -> VfsResult<()> {
        let mut state = self.init.lock().unwrap();
        self.ensure_entries_locked(&mut state)
    }

    fn ensure_entries_locked(&self, state: &mut InitState) -> VfsResult<()> {
        if *state != InitState::NotInitialized {
            return Ok(());
        }
        *state = InitState::Initializing;
        match self.init_entries() {
            Ok(()) => {
                *state = InitState::Initialized;
                Ok(())
            }
            Err(err) => {
                *state = InitState::NotInitialized;
                match self.exception_handler() {
                    Some(eh) => {
                        eh.handle_init_error(&err, &self.name);
                        Ok(())
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Entry point of every non-root query: initialize on first use, and
    /// rebuild the index when the backing file changed. Re-build failures
    /// are swallowed so the root handler stays usable over a partial (or
    /// empty) index.
    fn check_if_modified(&self) -> VfsResult<()> {
        let mut state = self.init.lock().unwrap();
        match *state {
            InitState::NotInitialized => self.ensure_entries_locked(&mut state),
            InitState::Initialized => {
                let source = self.zip_source()?;
                if source.has_been_modified() {
                    debug!(uri = %self.uri, "rebuilding index after modification");
                    self.index.clear_keep_root();
                    if source.exists()
                        && let Err(err) = self.init_entries()
                    {
                        warn!(
                            uri = %self.uri,
                            error = %err,
                            "ignoring failed re-initialization after archive modification"
                        );
                    }
                }
                Ok(())
            }
            InitState::Initializing => Ok(()),
        }
    }

    pub(crate) fn child(&self, parent: &Handler, name: &str) -> VfsResult<Option<Arc<Handler>>> {
        if name.is_empty() {
            return Err(VfsError::BadArgument("empty child name".into()));
        }
        self.check_if_modified()?;
        let path = local_join(parent.local_path(), name);
        Ok(self.index.get(&path).map(|info| info.handler()))
    }

    pub(crate) fn children(&self, parent: &Handler) -> VfsResult<Vec<Arc<Handler>>> {
        self.check_if_modified()?;
        match self.index.get(parent.local_path()) {
            None => Ok(Vec::new()),
            Some(info) => {
                let installed = info.handler();
                if installed.is_delegating() && !std::ptr::eq(installed.as_ref(), parent) {
                    // The entry was replaced by a mounted or substituted
                    // view; the caller holds the original handler.
                    return installed.children();
                }
                Ok(info.children())
            }
        }
    }

    pub(crate) fn open_stream(&self, handler: &Handler) -> VfsResult<Box<dyn Read + Send>> {
        if handler.is_root() {
            return self.zip_source()?.root_as_stream();
        }
        self.check_if_modified()?;
        let info = self.index.get(handler.local_path()).ok_or_else(|| {
            VfsError::NotFound(self.child_uri(handler.local_path()))
        })?;
        match info.raw() {
            // Synthesized directories have nothing behind them.
            None => Ok(Box::new(std::io::empty())),
            Some(raw) => {
                let stream = self.zip_source()?.open_entry(&raw)?;
                Ok(Box::new(CertCapture::new(stream, info)))
            }
        }
    }

    pub(crate) fn size(&self, handler: &Handler) -> VfsResult<u64> {
        if handler.is_root() {
            return self.zip_source()?.size();
        }
        self.check_if_modified()?;
        Ok(self
            .index
            .get(handler.local_path())
            .and_then(|info| info.raw())
            .map(|raw| raw.size)
            .unwrap_or(0))
    }

    pub(crate) fn last_modified(&self, handler: &Handler) -> VfsResult<SystemTime> {
        if !handler.is_root() {
            self.check_if_modified()?;
        }
        let info = match self.index.get(handler.local_path()) {
            Some(info) => info,
            None => return Ok(UNIX_EPOCH),
        };
        match info.raw() {
            Some(raw) => Ok(raw.last_modified()),
            None => Ok(self.zip_source()?.last_modified()),
        }
    }

    pub(crate) fn is_leaf(&self, handler: &Handler) -> VfsResult<bool> {
        if handler.is_root() {
            return Ok(self.zip_source()?.is_leaf_root());
        }
        self.check_if_modified()?;
        Ok(self
            .index
            .get(handler.local_path())
            .and_then(|info| info.raw())
            .map(|raw| !raw.is_directory)
            .unwrap_or(false))
    }

    pub(crate) fn exists(&self, handler: &Handler) -> VfsResult<bool> {
        if handler.is_root() {
            return Ok(self.zip_source()?.exists());
        }
        self.check_if_modified()?;
        Ok(self.index.contains(handler.local_path()))
    }

    pub(crate) fn certificates(&self, handler: &Handler) -> Option<Vec<Vec<u8>>> {
        self.index
            .get(handler.local_path())
            .and_then(|info| info.certificates())
    }

    pub(crate) fn delete(&self, handler: &Handler, grace: Duration) -> VfsResult<bool> {
        if !handler.is_root() {
            return Ok(false);
        }
        self.zip_source()?.delete(grace)
    }

    /// Close the backing source when called on the root. A context that
    /// auto-cleans removes its backing file even if the source was never
    /// touched.
    pub(crate) fn cleanup(&self, handler: &Handler) {
        if !handler.is_root() {
            return;
        }
        let source = self.zip_source.lock().unwrap().clone();
        match source {
            Some(source) => source.close(),
            None => {
                if self.auto_clean
                    && let Some(path) = &self.file_path
                {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    }

    /// Swap `original` (a child of `parent`) for an externally-supplied
    /// view. The replacement is wrapped in a delegating handler unless it
    /// already is one; the entry loses its raw entry and children.
    pub fn replace_child(
        &self,
        parent: &Arc<Handler>,
        original: &Arc<Handler>,
        replacement: Arc<Handler>,
    ) -> VfsResult<()> {
        self.ensure_entries()?;
        let parent_info = self.index.get(parent.local_path()).ok_or_else(|| {
            VfsError::StateInvariant(format!("parent '{}' does not exist", parent.name()))
        })?;

        let installed = if replacement.is_delegating() {
            replacement
        } else {
            Handler::replacement(self.this.clone(), Some(parent), original.name(), replacement)
        };

        let _guard = self.init.lock().unwrap();
        parent_info.replace_child(original.name(), installed.clone());
        if let Some(info) = self.index.get(original.local_path()) {
            info.set_handler(installed);
            info.set_raw(None);
            info.clear_children();
        }
        Ok(())
    }

    pub(crate) fn real_url_for(&self, local: &str) -> VfsResult<String> {
        if self.file_path.is_some() {
            // The canonical URL is computed while the source is created.
            let _ = self.zip_source()?;
        }
        let mut base = match self.real_url.lock().unwrap().clone() {
            Some(base) => base,
            None => match self.peer_handler() {
                Some(peer) => peer.real_url()?,
                None => self.uri.clone(),
            },
        };
        if local.is_empty() {
            return Ok(base);
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(format!("{base}{local}"))
    }

    #[cfg(test)]
    pub(crate) fn test_zip_source(&self) -> Option<Arc<ZipSource>> {
        self.zip_source.lock().unwrap().clone()
    }

    #[cfg(test)]
    pub(crate) fn test_index_keys(&self) -> Vec<String> {
        self.index.keys()
    }
}

impl Drop for ZipEntryContext {
    fn drop(&mut self) {
        let source = self.zip_source.get_mut().unwrap().take();
        match source {
            Some(source) => source.close(),
            None => {
                if self.auto_clean
                    && let Some(path) = &self.file_path
                {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    }
}

/// Rewrite any archive-addressing URL to the `vfszip:` form with `!`
/// stripped, so child URIs compose by plain concatenation.
fn normalize_uri(raw: &str) -> String {
    let no_bang: String = raw.chars().filter(|c| *c != '!').collect();
    let no_query = no_bang.split('?').next().unwrap_or(&no_bang);
    if let Some(rest) = no_query.strip_prefix("vfszip:") {
        return format!("vfszip:{rest}");
    }
    match no_query.find(":/") {
        Some(pos) => format!("vfszip{}", &no_query[pos..]),
        None => format!("vfszip:{no_query}"),
    }
}

/// Split a raw URL into the backing file path and the entry prefix after
/// `!/`. The prefix is normalized to be empty or `/`-terminated.
fn init_root_and_path(raw: &str) -> (PathBuf, String) {
    let no_query = raw.split('?').next().unwrap_or(raw);
    let (zip_part, entry_part) = match no_query.find('!') {
        Some(pos) => {
            let rest = &no_query[pos + 1..];
            (&no_query[..pos], rest.strip_prefix('/').unwrap_or(rest))
        }
        None => (no_query, ""),
    };
    let mut root_entry_path = entry_part.to_string();
    if !root_entry_path.is_empty() && !root_entry_path.ends_with('/') {
        root_entry_path.push('/');
    }
    let path = match zip_part.find(":/") {
        Some(pos) => &zip_part[pos + 1..],
        None => zip_part,
    };
    (PathBuf::from(path), root_entry_path)
}

/// Last path component of the context URI, with any trailing separator or
/// archive marker trimmed.
fn derive_name(uri: &str) -> String {
    let path = strip_scheme(uri);
    let trimmed = path.trim_end_matches('/').trim_end_matches('!');
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

fn strip_scheme(uri: &str) -> &str {
    match uri.find(":/") {
        Some(pos) => &uri[pos + 1..],
        None => uri,
    }
}

fn jar_url(path: &Path, relative: Option<&str>) -> String {
    let base = format!("jar:file:{}!/", path.display());
    match relative {
        Some(rel) => format!("{base}{}", rel.strip_prefix('/').unwrap_or(rel)),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_normalization() {
        assert_eq!(
            normalize_uri("jar:file:/data/outer.jar!/lib"),
            "vfszip:/data/outer.jar/lib"
        );
        assert_eq!(normalize_uri("/data/outer.jar"), "vfszip:/data/outer.jar");
        assert_eq!(
            normalize_uri("file:/data/outer.jar?useCopy=true"),
            "vfszip:/data/outer.jar"
        );
        assert_eq!(
            normalize_uri("vfszip:/data/outer.jar"),
            "vfszip:/data/outer.jar"
        );
    }

    #[test]
    fn root_and_path_split() {
        let (path, root) = init_root_and_path("jar:file:/data/outer.jar!/a/b");
        assert_eq!(path, PathBuf::from("/data/outer.jar"));
        assert_eq!(root, "a/b/");

        let (path, root) = init_root_and_path("/data/outer.jar");
        assert_eq!(path, PathBuf::from("/data/outer.jar"));
        assert_eq!(root, "");

        let (path, root) = init_root_and_path("file:/data/outer.jar?noReaper=true");
        assert_eq!(path, PathBuf::from("/data/outer.jar"));
        assert_eq!(root, "");
    }

    #[test]
    fn name_derivation() {
        assert_eq!(derive_name("vfszip:/data/outer.jar"), "outer.jar");
        assert_eq!(derive_name("vfszip:/data/outer.jar/"), "outer.jar");
        assert_eq!(derive_name("vfszip:/data/outer.jar/lib"), "lib");
    }

    fn open_fixture(entries: &[(&str, &[u8])]) -> (tempfile::TempDir, Arc<ZipEntryContext>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.zip");
        crate::testutil::write_zip(&path, entries);
        let ctx = ZipEntryContext::open_with_config(
            path.to_str().unwrap(),
            Options::new(),
            Arc::new(VfsConfig::default()),
        )
        .unwrap();
        (dir, ctx)
    }

    #[test]
    fn concurrent_first_touch_initializes_once() {
        let (_dir, ctx) = open_fixture(&[("x.txt", b"concurrent bytes")]);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let ctx = &ctx;
                scope.spawn(move || {
                    let handler = ctx.root().child("x.txt").unwrap().unwrap();
                    let mut out = Vec::new();
                    handler.open_stream().unwrap().read_to_end(&mut out).unwrap();
                    assert_eq!(out, b"concurrent bytes");
                });
            }
        });

        let source = ctx.test_zip_source().unwrap();
        let file = source.as_file().unwrap();
        assert_eq!(
            file.inner().enumerations.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn every_non_root_key_has_its_parent_indexed() {
        let (_dir, ctx) = open_fixture(&[
            ("deep/a/b/c.txt", b"leaf"),
            ("lib/util.txt", b"u"),
            ("top.txt", b"t"),
        ]);
        ctx.ensure_entries().unwrap();

        let keys = ctx.test_index_keys();
        assert!(keys.contains(&String::new()));
        for key in &keys {
            if key.is_empty() {
                continue;
            }
            let (parent, _) = split_parent_child(key);
            assert!(
                keys.contains(&parent.unwrap().to_string()),
                "parent of '{key}' missing from index"
            );
        }
    }

    #[test]
    fn init_failure_resets_state_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, b"this is not an archive, only prose").unwrap();

        let ctx = ZipEntryContext::open_with_config(
            path.to_str().unwrap(),
            Options::new(),
            Arc::new(VfsConfig::default()),
        )
        .unwrap();

        assert!(ctx.root().child("anything").is_err());

        // A repaired file makes the next attempt succeed.
        crate::testutil::write_zip(&path, &[("fixed.txt", b"ok")]);
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_modified(std::time::SystemTime::now() + Duration::from_secs(5))
            .unwrap();
        drop(f);

        let handler = ctx.root().child("fixed.txt").unwrap();
        assert!(handler.is_some());
    }
}
