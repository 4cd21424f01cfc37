// LMDB-backed record storage for faces, unrecognized faces and detections
use anyhow::Result;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;
use std::sync::Arc;

const DB_FACES: &str = "faces";
const DB_UNRECOGNIZED: &str = "unrecognized";
const DB_DETECTIONS: &str = "detections";

/// Key of a face record filed under a label.
pub fn face_key(label: &str, id: &str) -> String {
    format!("{}/{}", label, id)
}

/// Detections sort by time within a label.
pub fn detection_key(label: &str, millis: i64, id: &str) -> String {
    format!("{}/{:020}/{}", label, millis.max(0), id)
}

fn label_prefix(label: &str) -> String {
    format!("{}/", label)
}

pub struct LmdbStorage {
    env: Arc<Env>,
    faces_db: Database<Str, Bytes>,
    unrecognized_db: Database<Str, Bytes>,
    detections_db: Database<Str, Bytes>,
}

impl LmdbStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        std::fs::create_dir_all(&path)?;

        let env = Arc::new(unsafe {
            EnvOpenOptions::new()
                .map_size(10 * 1024 * 1024 * 1024) // 10GB
                .max_dbs(4)
                .open(path)?
        });

        let mut wtxn = env.write_txn()?;
        let faces_db = env.create_database(&mut wtxn, Some(DB_FACES))?;
        let unrecognized_db = env.create_database(&mut wtxn, Some(DB_UNRECOGNIZED))?;
        let detections_db = env.create_database(&mut wtxn, Some(DB_DETECTIONS))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            faces_db,
            unrecognized_db,
            detections_db,
        })
    }

    pub fn save_face(&self, label: &str, id: &str, data: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.faces_db.put(&mut wtxn, &face_key(label, id), data)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_face(&self, label: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn()?;
        Ok(self
            .faces_db
            .get(&rtxn, &face_key(label, id))?
            .map(|data| data.to_vec()))
    }

    pub fn delete_face(&self, label: &str, id: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let existed = self.faces_db.delete(&mut wtxn, &face_key(label, id))?;
        wtxn.commit()?;
        Ok(existed)
    }

    /// All face records as `(key, bytes)`, ordered by key.
    pub fn iter_faces(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let rtxn = self.env.read_txn()?;
        let mut faces = Vec::new();
        for result in self.faces_db.iter(&rtxn)? {
            let (key, data) = result?;
            faces.push((key.to_string(), data.to_vec()));
        }
        Ok(faces)
    }

    pub fn faces_for_label(&self, label: &str) -> Result<Vec<Vec<u8>>> {
        let rtxn = self.env.read_txn()?;
        let mut faces = Vec::new();
        for result in self.faces_db.prefix_iter(&rtxn, &label_prefix(label))? {
            let (_, data) = result?;
            faces.push(data.to_vec());
        }
        Ok(faces)
    }

    /// Distinct labels, sorted.
    pub fn list_labels(&self) -> Result<Vec<String>> {
        let rtxn = self.env.read_txn()?;
        let mut labels: Vec<String> = Vec::new();
        for result in self.faces_db.iter(&rtxn)? {
            let (key, _) = result?;
            if let Some((label, _)) = key.split_once('/') {
                if labels.last().map(String::as_str) != Some(label) {
                    labels.push(label.to_string());
                }
            }
        }
        Ok(labels)
    }

    /// Re-key a face record in a single transaction. Returns the moved bytes.
    pub fn move_face(&self, from: &str, to: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let mut wtxn = self.env.write_txn()?;
        let source = face_key(from, id);
        let data = match self.faces_db.get(&wtxn, &source)? {
            Some(data) => data.to_vec(),
            None => return Ok(None),
        };
        self.faces_db.delete(&mut wtxn, &source)?;
        self.faces_db.put(&mut wtxn, &face_key(to, id), &data)?;
        wtxn.commit()?;
        Ok(Some(data))
    }

    pub fn save_unrecognized(&self, id: &str, data: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.unrecognized_db.put(&mut wtxn, id, data)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn iter_unrecognized(&self) -> Result<Vec<Vec<u8>>> {
        let rtxn = self.env.read_txn()?;
        let mut records = Vec::new();
        for result in self.unrecognized_db.iter(&rtxn)? {
            let (_, data) = result?;
            records.push(data.to_vec());
        }
        Ok(records)
    }

    /// Move an unrecognized record under `label` in a single transaction.
    pub fn claim_unrecognized(&self, id: &str, label: &str) -> Result<Option<Vec<u8>>> {
        let mut wtxn = self.env.write_txn()?;
        let data = match self.unrecognized_db.get(&wtxn, id)? {
            Some(data) => data.to_vec(),
            None => return Ok(None),
        };
        self.unrecognized_db.delete(&mut wtxn, id)?;
        self.faces_db.put(&mut wtxn, &face_key(label, id), &data)?;
        wtxn.commit()?;
        Ok(Some(data))
    }

    pub fn save_detection(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.detections_db.put(&mut wtxn, key, data)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Detections for one label, oldest first.
    pub fn detections_for_label(&self, label: &str) -> Result<Vec<Vec<u8>>> {
        let rtxn = self.env.read_txn()?;
        let mut detections = Vec::new();
        for result in self.detections_db.prefix_iter(&rtxn, &label_prefix(label))? {
            let (_, data) = result?;
            detections.push(data.to_vec());
        }
        Ok(detections)
    }
}
