use crate::blob::BlobStore;
use crate::lmdb_storage::{detection_key, LmdbStorage};
use crate::model_cache::FileModelCache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use visage_core::{
    validate_label, Bucket, DetectionRecord, Error, FaceRecord, FaceStore, Profile, Result,
};

fn storage_err(e: anyhow::Error) -> Error {
    Error::Storage(e.to_string())
}

fn decode_record(bytes: &[u8]) -> Result<FaceRecord> {
    Ok(bincode::deserialize(bytes)?)
}

fn decode_detection(bytes: &[u8]) -> Result<DetectionRecord> {
    Ok(bincode::deserialize(bytes)?)
}

/// Decode every value, dropping the ones that no longer parse so a single
/// damaged entry cannot hide the rest.
fn decode_readable<T>(
    values: Vec<Vec<u8>>,
    decode: fn(&[u8]) -> Result<T>,
    what: &'static str,
) -> Vec<T> {
    values
        .iter()
        .filter_map(|bytes| match decode(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, kind = what, "skipping undecodable entry");
                None
            }
        })
        .collect()
}

/// [`FaceStore`] on local disk.
///
/// Layout under the data directory:
///
/// ```text
/// lmdb/    face records, unrecognized records, detection logs
/// blobs/   face images (faces/<label>/<id>.jpg, unrecognized/<id>.jpg)
/// cache/   classifier.bin, label_table.bin
/// ```
pub struct LocalStore {
    data_dir: PathBuf,
    lmdb: LmdbStorage,
    blobs: BlobStore,
    cache: Arc<FileModelCache>,
}

impl LocalStore {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let lmdb = LmdbStorage::new(data_dir.join("lmdb")).map_err(storage_err)?;
        let blobs = BlobStore::new(data_dir.join("blobs")).map_err(storage_err)?;
        let cache = Arc::new(FileModelCache::new(data_dir.join("cache"))?);

        info!(path = %data_dir.display(), "local store opened");
        Ok(Self {
            data_dir,
            lmdb,
            blobs,
            cache,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Classifier cache living next to the records.
    pub fn model_cache(&self) -> Arc<FileModelCache> {
        self.cache.clone()
    }

    pub fn read_blob(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.blobs.get(path).map_err(storage_err)
    }
}

impl FaceStore for LocalStore {
    fn load_corpus(&self) -> Result<Vec<(String, FaceRecord)>> {
        let mut records = Vec::new();
        for (key, bytes) in self.lmdb.iter_faces().map_err(storage_err)? {
            let label = match key.split_once('/') {
                Some((label, _)) => label.to_string(),
                None => {
                    warn!(key = %key, "skipping malformed face key");
                    continue;
                }
            };
            match decode_record(&bytes) {
                Ok(record) => records.push((label, record)),
                Err(e) => warn!(key = %key, error = %e, "skipping undecodable face record"),
            }
        }
        Ok(records)
    }

    fn list_labels(&self) -> Result<Vec<String>> {
        self.lmdb.list_labels().map_err(storage_err)
    }

    fn profile(&self, label: &str) -> Result<Profile> {
        let images = decode_readable(
            self.lmdb.faces_for_label(label).map_err(storage_err)?,
            decode_record,
            "face",
        );
        if images.is_empty() {
            return Err(Error::LabelNotFound(label.to_string()));
        }

        let mut detections = decode_readable(
            self.lmdb.detections_for_label(label).map_err(storage_err)?,
            decode_detection,
            "detection",
        );
        detections.reverse();

        Ok(Profile {
            label: label.to_string(),
            images,
            detections,
        })
    }

    fn list_unrecognized(&self) -> Result<Vec<FaceRecord>> {
        let mut records = decode_readable(
            self.lmdb.iter_unrecognized().map_err(storage_err)?,
            decode_record,
            "unrecognized face",
        );
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(records)
    }

    fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<String> {
        self.blobs.put(path, bytes).map_err(storage_err)
    }

    fn put_record(
        &self,
        bucket: &Bucket,
        vector: &[f32],
        image_url: Option<String>,
    ) -> Result<FaceRecord> {
        let record = FaceRecord::new(vector.to_vec(), image_url);
        let bytes = bincode::serialize(&record)?;
        let id = record.id.to_string();
        match bucket {
            Bucket::Label(label) => {
                validate_label(label)?;
                self.lmdb.save_face(label, &id, &bytes).map_err(storage_err)?;
            }
            Bucket::Unrecognized => {
                self.lmdb.save_unrecognized(&id, &bytes).map_err(storage_err)?;
            }
        }
        Ok(record)
    }

    fn put_detection(&self, label: &str, confidence: f32) -> Result<DetectionRecord> {
        validate_label(label)?;
        let record = DetectionRecord::new(label, confidence);
        let key = detection_key(label, record.timestamp.timestamp_millis(), &record.id.to_string());
        self.lmdb
            .save_detection(&key, &bincode::serialize(&record)?)
            .map_err(storage_err)?;
        Ok(record)
    }

    fn assign_unrecognized(&self, id: &Uuid, label: &str) -> Result<FaceRecord> {
        validate_label(label)?;
        match self
            .lmdb
            .claim_unrecognized(&id.to_string(), label)
            .map_err(storage_err)?
        {
            Some(bytes) => decode_record(&bytes),
            None => Err(Error::RecordNotFound(id.to_string())),
        }
    }

    fn move_record(&self, from: &str, to: &str, id: &Uuid) -> Result<FaceRecord> {
        validate_label(to)?;
        match self.lmdb.move_face(from, to, &id.to_string()).map_err(storage_err)? {
            Some(bytes) => decode_record(&bytes),
            None if self.lmdb.faces_for_label(from).map_err(storage_err)?.is_empty() => {
                Err(Error::LabelNotFound(from.to_string()))
            }
            None => Err(Error::RecordNotFound(id.to_string())),
        }
    }

    fn delete_record(&self, label: &str, id: &Uuid) -> Result<bool> {
        self.lmdb.delete_face(label, &id.to_string()).map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = LocalStore::open(dir.path()).unwrap();
            store
                .put_record(&Bucket::Label("alice".to_string()), &[1.0, 0.0], None)
                .unwrap()
                .id
        };

        let store = LocalStore::open(dir.path()).unwrap();
        let corpus = store.load_corpus().unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].0, "alice");
        assert_eq!(corpus[0].1.id, id);
        assert_eq!(corpus[0].1.vector, vec![1.0, 0.0]);
    }

    #[test]
    fn test_profile_and_detections() {
        let (_dir, store) = open();
        store
            .put_record(&Bucket::Label("alice".to_string()), &[1.0], None)
            .unwrap();
        store.put_detection("alice", 0.7).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.put_detection("alice", 0.9).unwrap();

        let profile = store.profile("alice").unwrap();
        assert_eq!(profile.images.len(), 1);
        assert_eq!(profile.detections.len(), 2);
        assert!((profile.detections[0].confidence - 0.9).abs() < 1e-6);

        assert!(matches!(store.profile("bob"), Err(Error::LabelNotFound(_))));
    }

    #[test]
    fn test_curation() {
        let (_dir, store) = open();
        let unknown = store.put_record(&Bucket::Unrecognized, &[0.5, 0.5], None).unwrap();
        assert_eq!(store.list_unrecognized().unwrap().len(), 1);

        let assigned = store.assign_unrecognized(&unknown.id, "carol").unwrap();
        assert_eq!(assigned.id, unknown.id);
        assert!(store.list_unrecognized().unwrap().is_empty());
        assert_eq!(store.list_labels().unwrap(), vec!["carol"]);

        store.move_record("carol", "dave", &unknown.id).unwrap();
        assert_eq!(store.list_labels().unwrap(), vec!["dave"]);
        assert!(matches!(
            store.move_record("carol", "dave", &unknown.id),
            Err(Error::LabelNotFound(_))
        ));
        assert!(matches!(
            store.move_record("dave", "erin", &Uuid::new_v4()),
            Err(Error::RecordNotFound(_))
        ));

        assert!(store.delete_record("dave", &unknown.id).unwrap());
        assert!(store.list_labels().unwrap().is_empty());
    }

    #[test]
    fn test_undecodable_entries_are_skipped() {
        let (_dir, store) = open();
        let alice = store
            .put_record(&Bucket::Label("alice".to_string()), &[1.0, 0.0], None)
            .unwrap();
        store.put_detection("alice", 0.8).unwrap();
        store.put_record(&Bucket::Unrecognized, &[0.5, 0.5], None).unwrap();

        store.lmdb.save_face("bob", "x", b"junk").unwrap();
        store.lmdb.save_face("alice", "y", b"junk").unwrap();
        store.lmdb.save_unrecognized("z", b"junk").unwrap();
        store
            .lmdb
            .save_detection(&detection_key("alice", 0, "w"), b"junk")
            .unwrap();

        let corpus = store.load_corpus().unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].1.id, alice.id);

        let profile = store.profile("alice").unwrap();
        assert_eq!(profile.images.len(), 1);
        assert_eq!(profile.detections.len(), 1);
        assert_eq!(store.list_unrecognized().unwrap().len(), 1);
    }

    #[test]
    fn test_blobs_and_label_validation() {
        let (_dir, store) = open();
        let url = store.put_blob("faces/alice/x.jpg", b"jpeg").unwrap();
        assert!(url.starts_with("file://"));
        assert_eq!(store.read_blob("faces/alice/x.jpg").unwrap(), Some(b"jpeg".to_vec()));

        let bad = store.put_record(&Bucket::Label("a/b".to_string()), &[1.0], None);
        assert!(matches!(bad, Err(Error::InvalidLabel(_))));
    }
}
