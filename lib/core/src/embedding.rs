use crate::vector::Vector;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collection name for faces that matched no enrolled label.
pub const UNRECOGNIZED_BUCKET: &str = "unrecognized";

/// One enrolled observation: a label, its embedding and where the image lives.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledEmbedding {
    pub id: Uuid,
    pub label: String,
    pub vector: Vector,
    /// Resolvable URL of the stored face image, if one was uploaded
    pub source_ref: Option<String>,
}

impl LabeledEmbedding {
    #[inline]
    #[must_use]
    pub fn new(label: impl Into<String>, vector: Vector) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            vector,
            source_ref: None,
        }
    }
}

/// A face record as kept by the store, under a label or the unrecognized bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FaceRecord {
    /// Stamp a new record with a fresh id and the current time.
    pub fn new(vector: Vec<f32>, image_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vector,
            image_url,
            timestamp: Utc::now(),
        }
    }

    pub fn into_embedding(self, label: impl Into<String>) -> LabeledEmbedding {
        LabeledEmbedding {
            id: self.id,
            label: label.into(),
            vector: Vector::new(self.vector),
            source_ref: self.image_url,
        }
    }
}

/// A detection event for a recognized label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionRecord {
    pub id: Uuid,
    pub label: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl DetectionRecord {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Where a face record is filed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Bucket {
    Label(String),
    Unrecognized,
}

impl Bucket {
    /// Blob path for an image belonging to this bucket.
    pub fn blob_path(&self, id: &Uuid) -> String {
        match self {
            Bucket::Label(label) => format!("faces/{}/{}.jpg", label, id),
            Bucket::Unrecognized => format!("{}/{}.jpg", UNRECOGNIZED_BUCKET, id),
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Bucket::Label(label) => Some(label),
            Bucket::Unrecognized => None,
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bucket::Label(label) => write!(f, "faces/{}", label),
            Bucket::Unrecognized => write!(f, "{}", UNRECOGNIZED_BUCKET),
        }
    }
}

/// Everything the store holds for one label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub label: String,
    pub images: Vec<FaceRecord>,
    /// Newest first
    pub detections: Vec<DetectionRecord>,
}

/// Labels become path segments and key prefixes in the store, so `.` and
/// `..` are refused along with separators.
pub fn validate_label(label: &str) -> Result<()> {
    let trimmed = label.trim();
    if trimmed.is_empty()
        || trimmed.len() != label.len()
        || label == "."
        || label == ".."
        || label.contains('/')
        || label.chars().any(char::is_control)
    {
        return Err(Error::InvalidLabel(label.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_label() {
        assert!(validate_label("alice").is_ok());
        assert!(validate_label("Mary Jane").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label(" bob").is_err());
        assert!(validate_label("a/b").is_err());
        assert!(validate_label("tab\there").is_err());
        assert!(validate_label(".").is_err());
        assert!(validate_label("..").is_err());
        assert!(validate_label("...").is_ok());
        assert!(validate_label("j.doe").is_ok());
    }

    #[test]
    fn test_blob_paths() {
        let id = Uuid::new_v4();
        assert_eq!(
            Bucket::Label("alice".to_string()).blob_path(&id),
            format!("faces/alice/{}.jpg", id)
        );
        assert_eq!(
            Bucket::Unrecognized.blob_path(&id),
            format!("unrecognized/{}.jpg", id)
        );
    }

    #[test]
    fn test_record_into_embedding() {
        let record = FaceRecord::new(vec![1.0, 0.0], Some("file:///a.jpg".to_string()));
        let id = record.id;
        let embedding = record.into_embedding("alice");
        assert_eq!(embedding.id, id);
        assert_eq!(embedding.label, "alice");
        assert_eq!(embedding.source_ref.as_deref(), Some("file:///a.jpg"));
    }

    #[test]
    fn test_record_without_image_survives_bincode() {
        let record = FaceRecord::new(vec![1.0, 0.0], None);
        let bytes = bincode::serialize(&record).unwrap();
        let restored: FaceRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, record);
    }
}
