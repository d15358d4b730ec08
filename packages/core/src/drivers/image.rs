//! Boot image placement
//!
//! Downloading images is outside this crate; callers populate the cache
//! directory and drivers copy from it into the machine directory.

use std::fs;
use std::path::{Path, PathBuf};

use super::DriverError;

pub const BOOT_IMAGE_FILENAME: &str = "boot2podman.iso";

/// Puts a boot image into a machine's directory
pub trait BootImageStore: Send + Sync {
    /// Copy the image named by `source` (or the cached default when `None`)
    /// over `<store>/machines/<name>/boot2podman.iso`
    fn copy_to_machine_dir(&self, source: Option<&str>, machine_name: &str) -> Result<(), DriverError>;
}

/// Image cache under `<store>/cache`
#[derive(Debug, Clone)]
pub struct LocalImageCache {
    store_path: PathBuf,
}

impl LocalImageCache {
    pub fn new(store_path: &Path) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
        }
    }

    pub fn cached_image_path(&self) -> PathBuf {
        self.store_path.join("cache").join(BOOT_IMAGE_FILENAME)
    }

    fn resolve_source(&self, source: Option<&str>) -> Result<PathBuf, DriverError> {
        let path = match source.filter(|s| !s.is_empty()) {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                return Err(DriverError::InvalidConfig(format!(
                    "remote boot images are not fetched automatically; download {url} to {}",
                    self.cached_image_path().display()
                )));
            }
            Some(url) => PathBuf::from(url.strip_prefix("file://").unwrap_or(url)),
            None => self.cached_image_path(),
        };
        if !path.exists() {
            return Err(DriverError::InvalidConfig(format!(
                "boot image not found: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

impl BootImageStore for LocalImageCache {
    fn copy_to_machine_dir(&self, source: Option<&str>, machine_name: &str) -> Result<(), DriverError> {
        let src = self.resolve_source(source)?;
        let machine_dir = self.store_path.join("machines").join(machine_name);
        fs::create_dir_all(&machine_dir)?;
        let dst = machine_dir.join(BOOT_IMAGE_FILENAME);
        tracing::info!("Copying {} to {}", src.display(), dst.display());
        fs::copy(&src, &dst)?;
        Ok(())
    }
}
