//! Collaborator interfaces for the persistent face store and the classifier
//! cache, plus in-memory implementations for tests and ephemeral runs.

use crate::embedding::{validate_label, Bucket, DetectionRecord, FaceRecord, Profile};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Document + blob store holding enrolled faces, unrecognized faces and
/// detection logs.
///
/// Implementations must be safe for concurrent use: background writers and
/// the startup loader may call in from different threads.
pub trait FaceStore: Send + Sync {
    /// Every record filed under a label, as `(label, record)` pairs.
    fn load_corpus(&self) -> Result<Vec<(String, FaceRecord)>>;

    fn list_labels(&self) -> Result<Vec<String>>;

    /// Images and detection logs for one label.
    fn profile(&self, label: &str) -> Result<Profile>;

    fn list_unrecognized(&self) -> Result<Vec<FaceRecord>>;

    /// Upload image bytes and return a resolvable URL.
    fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<String>;

    /// Write a new record with a store-assigned id and timestamp.
    fn put_record(&self, bucket: &Bucket, vector: &[f32], image_url: Option<String>)
        -> Result<FaceRecord>;

    /// Write a detection event with a store-assigned id and timestamp.
    fn put_detection(&self, label: &str, confidence: f32) -> Result<DetectionRecord>;

    /// Move an unrecognized record under `label`, creating the label.
    fn assign_unrecognized(&self, id: &Uuid, label: &str) -> Result<FaceRecord>;

    /// Move a record from one label to another.
    fn move_record(&self, from: &str, to: &str, id: &Uuid) -> Result<FaceRecord>;

    /// Remove a record from a label. The image blob is left in place.
    fn delete_record(&self, label: &str, id: &Uuid) -> Result<bool>;
}

/// Blob slots used by the classifier cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    Classifier,
    LabelTable,
}

impl CacheSlot {
    pub fn file_name(self) -> &'static str {
        match self {
            CacheSlot::Classifier => "classifier.bin",
            CacheSlot::LabelTable => "label_table.bin",
        }
    }
}

/// Stable key-value storage for the serialized classifier.
pub trait ModelCache: Send + Sync {
    fn load_slot(&self, slot: CacheSlot) -> Result<Option<Vec<u8>>>;
    fn store_slot(&self, slot: CacheSlot, bytes: &[u8]) -> Result<()>;
}

#[derive(Default)]
struct MemoryStoreInner {
    faces: BTreeMap<String, Vec<FaceRecord>>,
    unrecognized: Vec<FaceRecord>,
    detections: Vec<DetectionRecord>,
    blobs: HashMap<String, Vec<u8>>,
}

/// In-memory [`FaceStore`]. Data is lost on restart.
///
/// [`MemoryStore::set_available`] simulates an unreachable backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with `(label, vector)` pairs.
    pub fn with_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for (label, vector) in records {
                inner
                    .faces
                    .entry(label.into())
                    .or_default()
                    .push(FaceRecord::new(vector, None));
            }
        }
        store
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    pub fn blob(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.read().blobs.get(path).cloned()
    }

    pub fn record_count(&self, label: &str) -> usize {
        self.inner.read().faces.get(label).map_or(0, Vec::len)
    }

    pub fn detection_count(&self) -> usize {
        self.inner.read().detections.len()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(Error::Storage("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

fn take_record(records: &mut Vec<FaceRecord>, id: &Uuid) -> Option<FaceRecord> {
    let pos = records.iter().position(|r| &r.id == id)?;
    Some(records.remove(pos))
}

impl FaceStore for MemoryStore {
    fn load_corpus(&self) -> Result<Vec<(String, FaceRecord)>> {
        self.check()?;
        let inner = self.inner.read();
        Ok(inner
            .faces
            .iter()
            .flat_map(|(label, records)| records.iter().map(move |r| (label.clone(), r.clone())))
            .collect())
    }

    fn list_labels(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.inner.read().faces.keys().cloned().collect())
    }

    fn profile(&self, label: &str) -> Result<Profile> {
        self.check()?;
        let inner = self.inner.read();
        let images = inner
            .faces
            .get(label)
            .cloned()
            .ok_or_else(|| Error::LabelNotFound(label.to_string()))?;
        let mut detections: Vec<DetectionRecord> = inner
            .detections
            .iter()
            .filter(|d| d.label == label)
            .cloned()
            .collect();
        detections.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(Profile {
            label: label.to_string(),
            images,
            detections,
        })
    }

    fn list_unrecognized(&self) -> Result<Vec<FaceRecord>> {
        self.check()?;
        Ok(self.inner.read().unrecognized.clone())
    }

    fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<String> {
        self.check()?;
        self.inner.write().blobs.insert(path.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", path))
    }

    fn put_record(
        &self,
        bucket: &Bucket,
        vector: &[f32],
        image_url: Option<String>,
    ) -> Result<FaceRecord> {
        self.check()?;
        let record = FaceRecord::new(vector.to_vec(), image_url);
        let mut inner = self.inner.write();
        match bucket {
            Bucket::Label(label) => {
                validate_label(label)?;
                inner.faces.entry(label.clone()).or_default().push(record.clone());
            }
            Bucket::Unrecognized => inner.unrecognized.push(record.clone()),
        }
        Ok(record)
    }

    fn put_detection(&self, label: &str, confidence: f32) -> Result<DetectionRecord> {
        self.check()?;
        let record = DetectionRecord::new(label, confidence);
        self.inner.write().detections.push(record.clone());
        Ok(record)
    }

    fn assign_unrecognized(&self, id: &Uuid, label: &str) -> Result<FaceRecord> {
        self.check()?;
        validate_label(label)?;
        let mut inner = self.inner.write();
        let record = take_record(&mut inner.unrecognized, id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        inner.faces.entry(label.to_string()).or_default().push(record.clone());
        Ok(record)
    }

    fn move_record(&self, from: &str, to: &str, id: &Uuid) -> Result<FaceRecord> {
        self.check()?;
        validate_label(to)?;
        let mut inner = self.inner.write();
        let source = inner
            .faces
            .get_mut(from)
            .ok_or_else(|| Error::LabelNotFound(from.to_string()))?;
        let record = take_record(source, id).ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        inner.faces.entry(to.to_string()).or_default().push(record.clone());
        Ok(record)
    }

    fn delete_record(&self, label: &str, id: &Uuid) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.write();
        Ok(inner
            .faces
            .get_mut(label)
            .and_then(|records| take_record(records, id))
            .is_some())
    }
}

/// In-memory [`ModelCache`].
#[derive(Default)]
pub struct MemoryModelCache {
    slots: RwLock<HashMap<CacheSlot, Vec<u8>>>,
}

impl MemoryModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

impl ModelCache for MemoryModelCache {
    fn load_slot(&self, slot: CacheSlot) -> Result<Option<Vec<u8>>> {
        Ok(self.slots.read().get(&slot).cloned())
    }

    fn store_slot(&self, slot: CacheSlot, bytes: &[u8]) -> Result<()> {
        self.slots.write().insert(slot, bytes.to_vec());
        Ok(())
    }
}
