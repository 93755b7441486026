//! Process-wide configuration and per-context options.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// Option key: extract nested archives to a temp file instead of holding
/// them in memory.
pub const USE_COPY: &str = "useCopy";
/// Option key: close file descriptors synchronously on release instead of
/// handing them to the background reaper.
pub const NO_REAPER: &str = "noReaper";
/// Option key: case-sensitive stat checks for directory-backed consumers.
pub const CASE_SENSITIVE: &str = "caseSensitive";

const FORCE_COPY_ENV: &str = "ZIPVFS_FORCE_COPY";
const FORCE_NO_REAPER_ENV: &str = "ZIPVFS_FORCE_NO_REAPER";
const FORCE_CASE_SENSITIVE_ENV: &str = "ZIPVFS_FORCE_CASE_SENSITIVE";
const FORCE_LEGACY_JAR_ENV: &str = "ZIPVFS_FORCE_LEGACY_JAR";

/// Immutable snapshot of the process-wide switches.
///
/// The default snapshot is read from the environment exactly once; tests
/// construct their own and hand it to [`crate::ZipEntryContext`] so the
/// global state never needs to be mutated.
#[derive(Debug, Clone)]
pub struct VfsConfig {
    /// Every nested archive is extracted to a temp file.
    pub force_copy: bool,
    /// Every file source closes its descriptor synchronously.
    pub force_no_reaper: bool,
    /// Stat checks are case-sensitive everywhere.
    pub force_case_sensitive: bool,
    /// Consumers should route top-level archives to the legacy jar handler.
    /// Has no effect inside this crate; surfaced for the URL layer.
    pub force_legacy_jar: bool,
    /// Root for the shared nested-archive temp directory.
    pub temp_root: PathBuf,
}

impl VfsConfig {
    fn from_env() -> VfsConfig {
        VfsConfig {
            force_copy: env_flag(FORCE_COPY_ENV),
            force_no_reaper: env_flag(FORCE_NO_REAPER_ENV),
            force_case_sensitive: env_flag(FORCE_CASE_SENSITIVE_ENV),
            force_legacy_jar: env_flag(FORCE_LEGACY_JAR_ENV),
            temp_root: std::env::temp_dir(),
        }
    }

    /// The shared snapshot, read from the environment on first use.
    pub fn global() -> Arc<VfsConfig> {
        static GLOBAL: OnceLock<Arc<VfsConfig>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(VfsConfig::from_env())).clone()
    }
}

impl Default for VfsConfig {
    fn default() -> VfsConfig {
        VfsConfig {
            force_copy: false,
            force_no_reaper: false,
            force_case_sensitive: false,
            force_legacy_jar: false,
            temp_root: std::env::temp_dir(),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

/// Per-context option bag.
///
/// Keys are free-form strings; boolean accessors treat `"true"` (any case)
/// and `"1"` as set. A mounted context aggregates its peer's options under
/// its own, so a nested archive inherits e.g. `useCopy` from its container.
#[derive(Debug, Default)]
pub struct Options {
    map: Mutex<HashMap<String, String>>,
}

impl Options {
    pub fn new() -> Options {
        Options::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.map.lock().unwrap().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }

    /// Copy every entry of `other` into this bag, overwriting collisions.
    pub fn merge(&self, other: &Options) {
        let other = other.map.lock().unwrap().clone();
        self.map.lock().unwrap().extend(other);
    }
}

impl Clone for Options {
    fn clone(&self) -> Options {
        Options {
            map: Mutex::new(self.map.lock().unwrap().clone()),
        }
    }
}
