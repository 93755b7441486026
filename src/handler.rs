//! Nodes of the virtual tree.
//!
//! A handler is identified inside its context by a `/`-separated local
//! path. Two kinds exist: plain archive-entry handlers, and delegating
//! handlers that name a mounted sub-archive (or a replacement view) and
//! forward every content operation to the root of the mounted context.
//!
//! Handlers hold only weak references upward (context, parent); ownership
//! flows strictly from a context through its index down to mounted
//! sub-contexts, so dropping the outermost context releases everything.

use std::io::Read;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime};

use crate::context::ZipEntryContext;
use crate::error::{VfsError, VfsResult};
use crate::path::local_join;

pub struct Handler {
    context: Weak<ZipEntryContext>,
    parent: Option<Weak<Handler>>,
    name: String,
    local_path: String,
    kind: HandlerKind,
}

enum HandlerKind {
    ZipEntry,
    Delegating(Delegation),
}

struct Delegation {
    delegate: RwLock<Option<Arc<Handler>>>,
    /// The mounted sub-context, kept alive by this handler. Absent for
    /// replacement views, whose delegate lives in some other tree.
    sub: Mutex<Option<Arc<ZipEntryContext>>>,
}

impl Handler {
    pub(crate) fn zip_entry(
        context: Weak<ZipEntryContext>,
        parent: Option<&Arc<Handler>>,
        name: &str,
    ) -> Arc<Handler> {
        Arc::new(Handler {
            context,
            local_path: Handler::local_path_for(parent, name),
            parent: parent.map(Arc::downgrade),
            name: name.to_string(),
            kind: HandlerKind::ZipEntry,
        })
    }

    pub(crate) fn delegating(
        context: Weak<ZipEntryContext>,
        parent: Option<&Arc<Handler>>,
        name: &str,
    ) -> Arc<Handler> {
        Arc::new(Handler {
            context,
            local_path: Handler::local_path_for(parent, name),
            parent: parent.map(Arc::downgrade),
            name: name.to_string(),
            kind: HandlerKind::Delegating(Delegation {
                delegate: RwLock::new(None),
                sub: Mutex::new(None),
            }),
        })
    }

    /// Wrap an externally-supplied view so it can sit in this tree under
    /// the replaced child's name.
    pub(crate) fn replacement(
        context: Weak<ZipEntryContext>,
        parent: Option<&Arc<Handler>>,
        name: &str,
        delegate: Arc<Handler>,
    ) -> Arc<Handler> {
        let handler = Handler::delegating(context, parent, name);
        handler.set_delegate(delegate);
        handler
    }

    fn local_path_for(parent: Option<&Arc<Handler>>, name: &str) -> String {
        match parent {
            Some(p) => local_join(&p.local_path, name),
            None => String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_path(&self) -> &str {
        &self.local_path
    }

    pub(crate) fn is_root(&self) -> bool {
        self.local_path.is_empty()
    }

    pub(crate) fn is_delegating(&self) -> bool {
        matches!(self.kind, HandlerKind::Delegating(_))
    }

    pub(crate) fn set_delegate(&self, delegate: Arc<Handler>) {
        if let HandlerKind::Delegating(d) = &self.kind {
            *d.delegate.write().unwrap() = Some(delegate);
        }
    }

    pub(crate) fn set_sub_context(&self, sub: Arc<ZipEntryContext>) {
        if let HandlerKind::Delegating(d) = &self.kind {
            *d.sub.lock().unwrap() = Some(sub);
        }
    }

    fn delegate(&self) -> VfsResult<Arc<Handler>> {
        match &self.kind {
            HandlerKind::Delegating(d) => d
                .delegate
                .read()
                .unwrap()
                .clone()
                .ok_or_else(|| {
                    VfsError::StateInvariant(format!("'{}' has no delegate installed", self.name))
                }),
            HandlerKind::ZipEntry => Err(VfsError::StateInvariant(format!(
                "'{}' is not a delegating handler",
                self.name
            ))),
        }
    }

    fn ctx(&self) -> VfsResult<Arc<ZipEntryContext>> {
        self.context
            .upgrade()
            .ok_or_else(|| VfsError::ContextGone(self.name.clone()))
    }

    pub(crate) fn owning_context(&self) -> Option<Arc<ZipEntryContext>> {
        self.context.upgrade()
    }

    /// Whether this node is an archive root: either the root of its own
    /// context or a mounted nested archive.
    pub fn is_archive(&self) -> bool {
        match &self.kind {
            HandlerKind::ZipEntry => self.is_root(),
            HandlerKind::Delegating(d) => d
                .delegate
                .read()
                .unwrap()
                .as_ref()
                .is_some_and(|delegate| delegate.is_root()),
        }
    }

    /// Whether some ancestor (across mounted contexts) is an archive.
    pub fn is_nested(&self) -> bool {
        let mut parent = self.parent();
        while let Some(p) = parent {
            if p.is_archive() {
                return true;
            }
            parent = p.parent();
        }
        false
    }

    /// The parent node. A mounted context's root resolves through its peer
    /// so path ancestry continues seamlessly in the outer tree.
    pub fn parent(&self) -> Option<Arc<Handler>> {
        if let Some(parent) = &self.parent
            && let Some(parent) = parent.upgrade()
        {
            return Some(parent);
        }
        let ctx = self.context.upgrade()?;
        ctx.peer_handler()?.parent()
    }

    /// The sub-context mounted behind this handler, when it names a
    /// nested archive.
    pub fn mounted_context(&self) -> Option<Arc<ZipEntryContext>> {
        match &self.kind {
            HandlerKind::Delegating(d) => d.sub.lock().unwrap().clone(),
            HandlerKind::ZipEntry => None,
        }
    }

    /// Look up a descendant by a `/`-separated path relative to this node.
    pub fn child(&self, path: &str) -> VfsResult<Option<Arc<Handler>>> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(VfsError::BadArgument(format!("invalid child path '{path}'")));
        }
        let mut current: Option<Arc<Handler>> = None;
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(VfsError::BadArgument(format!(
                    "invalid child path '{path}'"
                )));
            }
            let next = match &current {
                Some(handler) => handler.direct_child(segment)?,
                None => self.direct_child(segment)?,
            };
            current = match next {
                Some(next) => Some(next),
                None => return Ok(None),
            };
        }
        Ok(current)
    }

    fn direct_child(&self, name: &str) -> VfsResult<Option<Arc<Handler>>> {
        match &self.kind {
            HandlerKind::Delegating(_) => self.delegate()?.direct_child(name),
            HandlerKind::ZipEntry => self.ctx()?.child(self, name),
        }
    }

    pub fn children(&self) -> VfsResult<Vec<Arc<Handler>>> {
        match &self.kind {
            HandlerKind::Delegating(_) => self.delegate()?.children(),
            HandlerKind::ZipEntry => self.ctx()?.children(self),
        }
    }

    pub fn exists(&self) -> VfsResult<bool> {
        match &self.kind {
            HandlerKind::Delegating(_) => self.delegate()?.exists(),
            HandlerKind::ZipEntry => self.ctx()?.exists(self),
        }
    }

    pub fn is_leaf(&self) -> VfsResult<bool> {
        match &self.kind {
            HandlerKind::Delegating(_) => self.delegate()?.is_leaf(),
            HandlerKind::ZipEntry => self.ctx()?.is_leaf(self),
        }
    }

    pub fn size(&self) -> VfsResult<u64> {
        match &self.kind {
            HandlerKind::Delegating(_) => self.delegate()?.size(),
            HandlerKind::ZipEntry => self.ctx()?.size(self),
        }
    }

    pub fn last_modified(&self) -> VfsResult<SystemTime> {
        match &self.kind {
            HandlerKind::Delegating(_) => self.delegate()?.last_modified(),
            HandlerKind::ZipEntry => self.ctx()?.last_modified(self),
        }
    }

    pub fn open_stream(&self) -> VfsResult<Box<dyn Read + Send>> {
        match &self.kind {
            HandlerKind::Delegating(_) => self.delegate()?.open_stream(),
            HandlerKind::ZipEntry => self.ctx()?.open_stream(self),
        }
    }

    /// Certificates captured for this entry, available once its stream has
    /// been fully read and the archive carried signature data.
    pub fn certificates(&self) -> VfsResult<Option<Vec<Vec<u8>>>> {
        match &self.kind {
            HandlerKind::Delegating(_) => self.delegate()?.certificates(),
            HandlerKind::ZipEntry => Ok(self.ctx()?.certificates(self)),
        }
    }

    /// URI of this node under its context's `vfszip:` root.
    pub fn uri(&self) -> VfsResult<String> {
        let ctx = self.ctx()?;
        let base = ctx.uri().to_string();
        if self.local_path.is_empty() {
            return Ok(base);
        }
        let mut uri = format!("{}/{}", base.trim_end_matches('/'), self.local_path);
        if let Ok(false) = self.is_leaf()
            && !uri.ends_with('/')
        {
            uri.push('/');
        }
        Ok(uri)
    }

    /// Canonical `jar:file:…!/…` URL addressing this node through its
    /// backing archive file.
    pub fn real_url(&self) -> VfsResult<String> {
        self.ctx()?.real_url_for(&self.local_path)
    }

    /// Release backing resources. Meaningful on a context root (closes the
    /// source, deleting it when the context auto-cleans); elsewhere a no-op.
    pub fn cleanup(&self) {
        match &self.kind {
            HandlerKind::Delegating(_) => {
                if let Ok(delegate) = self.delegate() {
                    delegate.cleanup();
                }
            }
            HandlerKind::ZipEntry => {
                if let Ok(ctx) = self.ctx() {
                    ctx.cleanup(self);
                }
            }
        }
    }

    /// Delete the backing archive after waiting up to `grace` for
    /// outstanding streams. Only the context root can delete.
    pub fn delete(&self, grace: Duration) -> VfsResult<bool> {
        match &self.kind {
            HandlerKind::Delegating(_) => self.delegate()?.delete(grace),
            HandlerKind::ZipEntry => self.ctx()?.delete(self, grace),
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("local_path", &self.local_path)
            .field("delegating", &self.is_delegating())
            .finish()
    }
}
