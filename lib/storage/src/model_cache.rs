use atomicwrites::{AllowOverwrite, AtomicFile};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use visage_core::{CacheSlot, Error, ModelCache, Result};

/// Classifier cache kept as one file per slot under a directory.
///
/// Each slot is replaced atomically, so a crash mid-write leaves the old
/// blob intact. The two slots are not updated together; the classifier
/// slot carries its own label list, so decoding rejects a mismatched pair.
pub struct FileModelCache {
    dir: PathBuf,
}

impl FileModelCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self, slot: CacheSlot) -> PathBuf {
        self.dir.join(slot.file_name())
    }
}

impl ModelCache for FileModelCache {
    fn load_slot(&self, slot: CacheSlot) -> Result<Option<Vec<u8>>> {
        let path = self.path(slot);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    fn store_slot(&self, slot: CacheSlot, bytes: &[u8]) -> Result<()> {
        let path = self.path(slot);
        AtomicFile::new(&path, AllowOverwrite)
            .write(|f| f.write_all(bytes))
            .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = bytes.len(), "cache slot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use visage_core::{ClassifierCache, ModelOrigin, Vector, VectorCorpus};

    #[test]
    fn test_slots_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = FileModelCache::new(dir.path()).unwrap();
        assert_eq!(cache.load_slot(CacheSlot::Classifier).unwrap(), None);

        cache.store_slot(CacheSlot::Classifier, b"weights").unwrap();
        cache.store_slot(CacheSlot::Classifier, b"newer").unwrap();
        assert_eq!(cache.load_slot(CacheSlot::Classifier).unwrap(), Some(b"newer".to_vec()));
        assert_eq!(cache.load_slot(CacheSlot::LabelTable).unwrap(), None);
    }

    #[test]
    fn test_classifier_survives_restart() {
        let dir = TempDir::new().unwrap();
        let mut corpus = VectorCorpus::new(3);
        corpus.append("alice", Vector::new(vec![1.0, 0.0, 0.0])).unwrap();
        corpus.append("bob", Vector::new(vec![0.0, 1.0, 0.0])).unwrap();

        let first = ClassifierCache::new(Arc::new(FileModelCache::new(dir.path()).unwrap()));
        let (_, origin) = first.train_or_load(&corpus).unwrap();
        assert_eq!(origin, ModelOrigin::Trained);

        let second = ClassifierCache::new(Arc::new(FileModelCache::new(dir.path()).unwrap()));
        let (model, origin) = second.train_or_load(&corpus).unwrap();
        assert_eq!(origin, ModelOrigin::Cache);
        assert_eq!(model.predict(&Vector::new(vec![1.0, 0.0, 0.0])).unwrap().0, "alice");
    }
}
