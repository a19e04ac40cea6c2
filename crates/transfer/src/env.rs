//! Device environment seam: disk space, cache eviction and connectivity.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::SeamFuture;
use crate::paths::{Root, StorageRoots};

/// Queries and actions the pipelines need from the host device.
pub trait DeviceEnv: Send + Sync {
    /// Free bytes on the volume holding the storage roots.
    fn free_disk_space(&self) -> SeamFuture<'_, u64>;

    /// Evicts reclaimable cached content.
    fn clear_caches(&self) -> SeamFuture<'_, ()>;

    fn is_online(&self) -> bool;

    fn is_wifi(&self) -> bool;
}

/// Free-space probe for a directory.
pub type SpaceProbe = Box<dyn Fn(&Path) -> io::Result<u64> + Send + Sync>;

/// Default environment over local storage roots.
///
/// Free space comes from a caller-supplied probe. Clearing caches empties the
/// secondary download cache; the temp root is left alone because in-flight
/// downloads keep their chunk artifacts there.
pub struct LocalDeviceEnv {
    roots: StorageRoots,
    probe: SpaceProbe,
    online: AtomicBool,
    wifi: AtomicBool,
}

impl LocalDeviceEnv {
    pub fn new(roots: StorageRoots, probe: SpaceProbe) -> Self {
        Self {
            roots,
            probe,
            online: AtomicBool::new(true),
            wifi: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    pub fn set_wifi(&self, wifi: bool) {
        self.wifi.store(wifi, Ordering::Relaxed);
    }
}

impl DeviceEnv for LocalDeviceEnv {
    fn free_disk_space(&self) -> SeamFuture<'_, u64> {
        Box::pin(async move {
            let base = self.roots.base().to_path_buf();
            Ok((self.probe)(&base)?)
        })
    }

    fn clear_caches(&self) -> SeamFuture<'_, ()> {
        Box::pin(async move {
            let dir = self.roots.dir(Root::Cache);
            let removed = tokio::task::spawn_blocking(move || clear_dir(&dir)).await??;
            debug!(removed, "cleared download cache");
            Ok(())
        })
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn is_wifi(&self) -> bool {
        self.wifi.load(Ordering::Relaxed)
    }
}

/// Removes every entry inside `dir`, keeping the directory itself.
fn clear_dir(dir: &Path) -> io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to evict cache entry"),
        }
    }
    Ok(removed)
}
