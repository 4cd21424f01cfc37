// Image blobs on the local filesystem, written atomically
use anyhow::{anyhow, Result};
use atomicwrites::{AllowOverwrite, AtomicFile};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolve a relative blob path, refusing anything that escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(anyhow!("invalid blob path: {:?}", path));
        }
        Ok(self.root.join(relative))
    }

    /// Write `bytes` at `path` and return a `file://` URL for it.
    pub fn put(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        AtomicFile::new(&target, AllowOverwrite).write(|f| f.write_all(bytes))?;
        Ok(format!("file://{}", target.display()))
    }

    pub fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let target = self.resolve(path)?;
        if !target.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(target)?))
    }
}
