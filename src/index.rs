use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, RwLock};

use crate::format::RawZipEntry;
use crate::handler::Handler;

/// Map from local path to entry metadata.
///
/// The root key `""` is installed at construction and survives every
/// clear; readers may observe a partially-built index during
/// initialization, which is harmless because queries funnel through the
/// context's init lock first.
pub(crate) struct EntryIndex {
    map: RwLock<HashMap<String, Arc<EntryInfo>>>,
}

impl EntryIndex {
    pub fn new(root: Arc<EntryInfo>) -> EntryIndex {
        let mut map = HashMap::new();
        map.insert(String::new(), root);
        EntryIndex {
            map: RwLock::new(map),
        }
    }

    pub fn root(&self) -> Arc<EntryInfo> {
        self.map.read().unwrap()[""].clone()
    }

    pub fn get(&self, path: &str) -> Option<Arc<EntryInfo>> {
        self.map.read().unwrap().get(path).cloned()
    }

    pub fn insert(&self, path: String, info: Arc<EntryInfo>) {
        self.map.write().unwrap().insert(path, info);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.map.read().unwrap().contains_key(path)
    }

    /// Drop everything but the root entry; the root also loses its
    /// children so a re-initialization starts from a clean tree.
    pub fn clear_keep_root(&self) {
        let mut map = self.map.write().unwrap();
        let root = map[""].clone();
        map.clear();
        root.clear_children();
        root.set_raw(None);
        map.insert(String::new(), root);
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<String> {
        self.map.read().unwrap().keys().cloned().collect()
    }
}

/// Signature certificates attached to an entry.
///
/// `NotComputed` means the entry's stream has not been fully read yet;
/// `Absent` records that a complete read produced none. The distinction
/// keeps "no certificates" from being confused with "not checked yet".
#[derive(Debug, Clone)]
pub(crate) enum CertState {
    NotComputed,
    Absent,
    Present(Vec<Vec<u8>>),
}

pub(crate) struct EntryInfo {
    state: Mutex<EntryState>,
}

struct EntryState {
    handler: Arc<Handler>,
    raw: Option<RawZipEntry>,
    /// Insertion-ordered; an insert under an existing name replaces.
    children: Vec<Arc<Handler>>,
    certificates: CertState,
}

impl EntryInfo {
    pub fn new(handler: Arc<Handler>, raw: Option<RawZipEntry>) -> Arc<EntryInfo> {
        Arc::new(EntryInfo {
            state: Mutex::new(EntryState {
                handler,
                raw,
                children: Vec::new(),
                certificates: CertState::NotComputed,
            }),
        })
    }

    pub fn handler(&self) -> Arc<Handler> {
        self.state.lock().unwrap().handler.clone()
    }

    pub fn set_handler(&self, handler: Arc<Handler>) {
        self.state.lock().unwrap().handler = handler;
    }

    pub fn raw(&self) -> Option<RawZipEntry> {
        self.state.lock().unwrap().raw.clone()
    }

    pub fn set_raw(&self, raw: Option<RawZipEntry>) {
        self.state.lock().unwrap().raw = raw;
    }

    /// Children by copy, in insertion order.
    pub fn children(&self) -> Vec<Arc<Handler>> {
        self.state.lock().unwrap().children.clone()
    }

    pub fn add_child(&self, child: Arc<Handler>) {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .children
            .iter_mut()
            .find(|c| c.name() == child.name())
        {
            *existing = child;
        } else {
            state.children.push(child);
        }
    }

    pub fn replace_child(&self, original_name: &str, replacement: Arc<Handler>) {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .children
            .iter_mut()
            .find(|c| c.name() == original_name)
        {
            *existing = replacement;
        }
    }

    pub fn clear_children(&self) {
        self.state.lock().unwrap().children.clear();
    }

    /// Certificates, when a full read has produced some.
    pub fn certificates(&self) -> Option<Vec<Vec<u8>>> {
        match &self.state.lock().unwrap().certificates {
            CertState::Present(certs) => Some(certs.clone()),
            _ => None,
        }
    }

    /// Record that a complete read found no signature data. Leaves an
    /// already-present set untouched.
    pub fn mark_certificates_absent(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(state.certificates, CertState::NotComputed) {
            state.certificates = CertState::Absent;
        }
    }

    #[cfg(test)]
    pub(crate) fn certificates_computed(&self) -> bool {
        !matches!(
            self.state.lock().unwrap().certificates,
            CertState::NotComputed
        )
    }
}

/// Reader adapter that flips the owning entry's certificate state once the
/// underlying stream has been consumed to the end.
pub(crate) struct CertCapture<R: Read> {
    inner: R,
    info: Arc<EntryInfo>,
    finished: bool,
}

impl<R: Read> CertCapture<R> {
    pub fn new(inner: R, info: Arc<EntryInfo>) -> CertCapture<R> {
        CertCapture {
            inner,
            info,
            finished: false,
        }
    }
}

impl<R: Read> Read for CertCapture<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() && !self.finished {
            self.finished = true;
            self.info.mark_certificates_absent();
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;

    fn info(name: &str) -> Arc<EntryInfo> {
        EntryInfo::new(Handler::zip_entry(Weak::new(), None, name), None)
    }

    #[test]
    fn children_replace_by_name() {
        let parent = info("parent");
        parent.add_child(Handler::zip_entry(Weak::new(), None, "a"));
        parent.add_child(Handler::zip_entry(Weak::new(), None, "b"));
        assert_eq!(parent.children().len(), 2);

        // Same name replaces in place, order preserved.
        let replacement = Handler::zip_entry(Weak::new(), None, "a");
        parent.add_child(replacement.clone());
        let children = parent.children();
        assert_eq!(children.len(), 2);
        assert!(Arc::ptr_eq(&children[0], &replacement));
        assert_eq!(children[1].name(), "b");
    }

    #[test]
    fn clear_keep_root_preserves_identity() {
        let root = info("root");
        let index = EntryIndex::new(root.clone());
        index.insert("a".into(), info("a"));
        index.insert("a/b".into(), info("b"));

        index.clear_keep_root();
        assert!(index.contains(""));
        assert!(!index.contains("a"));
        assert!(Arc::ptr_eq(&index.root().handler(), &root.handler()));
    }

    #[test]
    fn certificate_state_flips_on_full_read() {
        let info = info("x.txt");
        assert!(!info.certificates_computed());
        assert!(info.certificates().is_none());

        let mut capture = CertCapture::new(&b"some bytes"[..], info.clone());
        let mut sink = Vec::new();
        capture.read_to_end(&mut sink).unwrap();

        assert!(info.certificates_computed());
        // Computed-but-absent still reads back as no certificates.
        assert!(info.certificates().is_none());
    }
}
