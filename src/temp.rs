//! Temporary storage for extracted nested archives.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use rand::RngCore;
use tracing::debug;

use crate::config::VfsConfig;
use crate::handler::Handler;

/// Directory under the system temp root shared by every context that
/// extracts without a dedicated store.
const NESTED_DIR: &str = "vfs-nested.tmp";

/// Per-context allocator of temp folders. When a consumer installs one,
/// extracted nested archives land in its folders instead of the shared
/// nested directory.
pub trait TempStore: Send + Sync {
    /// A folder to extract `entry_name` of `archive_name` into, or `None`
    /// to fall back to the shared directory.
    fn create_temp_folder(&self, archive_name: &str, entry_name: &str) -> Option<PathBuf>;
}

/// Record linking a context-relative nested-archive path to its extracted
/// file, so repeated initializations reuse the extraction.
pub(crate) struct TempInfo {
    pub file: PathBuf,
    #[allow(dead_code)]
    pub handler: Arc<Handler>,
}

impl TempInfo {
    pub fn is_valid(&self) -> bool {
        self.file.exists()
    }
}

/// The shared nested-archive temp directory. Its direct non-hidden file
/// children are swept once per process, clearing leftovers from earlier
/// runs.
pub(crate) fn nested_temp_dir(config: &VfsConfig) -> PathBuf {
    let dir = config.temp_root.join(NESTED_DIR);
    static SWEEP: Once = Once::new();
    SWEEP.call_once(|| sweep(&dir));
    dir
}

fn sweep(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let hidden = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if path.is_file() && !hidden {
            debug!(path = %path.display(), "sweeping stale nested temp file");
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Randomized file name for an extraction: 8 hex chars, an underscore,
/// then the entry's simple name.
pub(crate) fn temp_file_name(entry_name: &str) -> String {
    let simple = entry_name.rsplit('/').next().unwrap_or(entry_name);
    let mut bytes = [0u8; 4];
    rand::rng().fill_bytes(&mut bytes);
    format!("{}_{}", hex::encode(bytes), simple)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_name_shape() {
        let name = temp_file_name("lib/inner.jar");
        assert_eq!(name.len(), "00000000_inner.jar".len());
        assert!(name.ends_with("_inner.jar"));
        assert!(name[..8].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn temp_names_are_randomized() {
        assert_ne!(temp_file_name("a.jar"), temp_file_name("a.jar"));
    }
}
