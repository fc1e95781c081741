use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static WRITERS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Process-wide writer lock for one index file; handles opened on the same
/// path share it. Callers pass a path under a canonicalized directory.
pub(crate) fn writer_lock(path: &Path) -> Arc<Mutex<()>> {
    WRITERS.lock().entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
}
