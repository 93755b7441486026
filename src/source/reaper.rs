//! Background sweeper for idle file descriptors.
//!
//! File sources in reaper mode register here; a single thread wakes on a
//! short period, closes descriptors that have been idle past their grace
//! period, and prunes sources that have been dropped.

use std::sync::{Arc, Mutex, Once, OnceLock, Weak};
use std::time::Duration;

use super::file::FileInner;

const SWEEP_PERIOD: Duration = Duration::from_millis(200);

static REGISTRY: OnceLock<Mutex<Vec<Weak<FileInner>>>> = OnceLock::new();
static START: Once = Once::new();

fn registry() -> &'static Mutex<Vec<Weak<FileInner>>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

pub(crate) fn register(inner: &Arc<FileInner>) {
    START.call_once(|| {
        std::thread::Builder::new()
            .name("zipvfs-reaper".into())
            .spawn(sweep_loop)
            .expect("spawning reaper thread");
    });
    registry().lock().unwrap().push(Arc::downgrade(inner));
}

fn sweep_loop() {
    loop {
        std::thread::sleep(SWEEP_PERIOD);
        let mut sources = registry().lock().unwrap();
        sources.retain(|weak| match weak.upgrade() {
            Some(inner) => {
                inner.reap();
                true
            }
            None => false,
        });
    }
}
