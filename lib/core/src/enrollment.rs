//! Fire-and-forget persistence of face images, embeddings and detection
//! events. Every write runs on the background pool; the caller only learns
//! whether the job was queued.

use crate::background::{BackgroundJob, BackgroundJobSystem, BackgroundJobType, JobStats};
use crate::embedding::{Bucket, DetectionRecord, FaceRecord};
use crate::store::FaceStore;
use crate::{Error, Result, Vector};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const JPEG_QUALITY: u8 = 90;

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode_image(image)?;
    Ok(bytes)
}

/// Upload the image (if any) and write the face record. Synchronous; the
/// background job and the CLI both go through here.
pub fn write_face(
    store: &dyn FaceStore,
    image: Option<&RgbImage>,
    bucket: &Bucket,
    vector: &[f32],
) -> Result<FaceRecord> {
    let image_url = match image {
        Some(image) => {
            let bytes = encode_jpeg(image)?;
            let path = bucket.blob_path(&Uuid::new_v4());
            Some(store.put_blob(&path, &bytes)?)
        }
        None => None,
    };
    store.put_record(bucket, vector, image_url)
}

struct PersistFaceJob {
    store: Arc<dyn FaceStore>,
    image: RgbImage,
    bucket: Bucket,
    vector: Vec<f32>,
}

impl BackgroundJob for PersistFaceJob {
    fn execute(self: Box<Self>) -> Result<()> {
        let record = write_face(self.store.as_ref(), Some(&self.image), &self.bucket, &self.vector)
            .map_err(|e| Error::Persistence(format!("{}: {}", self.bucket, e)))?;
        debug!(bucket = %self.bucket, id = %record.id, "face persisted");
        Ok(())
    }

    fn job_type(&self) -> BackgroundJobType {
        BackgroundJobType::PersistFace
    }
}

struct LogDetectionJob {
    store: Arc<dyn FaceStore>,
    label: String,
    confidence: f32,
}

impl BackgroundJob for LogDetectionJob {
    fn execute(self: Box<Self>) -> Result<()> {
        let record: DetectionRecord = self
            .store
            .put_detection(&self.label, self.confidence)
            .map_err(|e| Error::Persistence(format!("detection for {}: {}", self.label, e)))?;
        debug!(label = %record.label, id = %record.id, "detection logged");
        Ok(())
    }

    fn job_type(&self) -> BackgroundJobType {
        BackgroundJobType::LogDetection
    }
}

/// Schedules store writes on a bounded worker pool.
///
/// Writes are at-most-once: a failed job is logged and counted, never
/// retried, and a job still queued at a crash is lost.
pub struct EnrollmentSink {
    store: Arc<dyn FaceStore>,
    jobs: BackgroundJobSystem,
}

impl EnrollmentSink {
    pub fn new(store: Arc<dyn FaceStore>, workers: usize, queue_capacity: usize) -> Result<Self> {
        Ok(Self {
            store,
            jobs: BackgroundJobSystem::new(workers, queue_capacity)?,
        })
    }

    /// Queue an image + embedding upload under `label`, or under the
    /// unrecognized bucket when `recognized` is false.
    pub fn persist_async(&self, image: RgbImage, label: &str, embedding: &Vector, recognized: bool) -> bool {
        let bucket = if recognized {
            Bucket::Label(label.to_string())
        } else {
            Bucket::Unrecognized
        };
        self.jobs.submit(Box::new(PersistFaceJob {
            store: self.store.clone(),
            image,
            bucket,
            vector: embedding.as_slice().to_vec(),
        }))
    }

    /// Queue a detection record. The store assigns the timestamp.
    pub fn log_event_async(&self, label: &str, confidence: f32) -> bool {
        self.jobs.submit(Box::new(LogDetectionJob {
            store: self.store.clone(),
            label: label.to_string(),
            confidence,
        }))
    }

    pub fn stats(&self, job_type: BackgroundJobType) -> JobStats {
        self.jobs.stats(job_type)
    }

    /// Wait until every write queued so far has reached the store or failed.
    pub fn flush(&self) {
        self.jobs.wait_idle();
    }

    /// Drain queued writes and stop the workers.
    pub fn shutdown(&self) {
        self.jobs.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn crop() -> RgbImage {
        RgbImage::from_pixel(8, 8, image::Rgb([120, 80, 40]))
    }

    #[test]
    fn test_write_face_uploads_blob() {
        let store = MemoryStore::new();
        let record = write_face(
            &store,
            Some(&crop()),
            &Bucket::Label("alice".to_string()),
            &[1.0, 0.0],
        )
        .unwrap();

        let url = record.image_url.unwrap();
        assert!(url.starts_with("memory://faces/alice/"));
        let path = url.trim_start_matches("memory://");
        let bytes = store.blob(path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_persist_and_log_async() {
        let store = Arc::new(MemoryStore::new());
        let sink = EnrollmentSink::new(store.clone(), 2, 16).unwrap();

        assert!(sink.persist_async(crop(), "alice", &Vector::new(vec![1.0, 0.0]), true));
        assert!(sink.persist_async(crop(), "ignored", &Vector::new(vec![0.0, 1.0]), false));
        assert!(sink.log_event_async("alice", 0.9));
        sink.shutdown();

        assert_eq!(store.record_count("alice"), 1);
        assert_eq!(store.record_count("ignored"), 0);
        assert_eq!(store.list_unrecognized().unwrap().len(), 1);
        assert_eq!(store.detection_count(), 1);
        assert_eq!(sink.stats(BackgroundJobType::PersistFace).completed, 2);
    }

    #[test]
    fn test_failures_stay_in_the_background() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let sink = EnrollmentSink::new(store.clone(), 1, 16).unwrap();

        assert!(sink.persist_async(crop(), "alice", &Vector::new(vec![1.0, 0.0]), true));
        assert!(sink.log_event_async("alice", 0.9));
        sink.shutdown();

        assert_eq!(sink.stats(BackgroundJobType::PersistFace).failed, 1);
        assert_eq!(sink.stats(BackgroundJobType::LogDetection).failed, 1);
    }
}
