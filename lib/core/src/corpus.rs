use crate::embedding::{validate_label, LabeledEmbedding};
use crate::store::FaceStore;
use crate::{Error, Result, Vector};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Every labeled embedding known to the engine, in insertion order.
///
/// The embedding dimension is fixed for the lifetime of a corpus; swapping
/// the extractor model means loading a new corpus.
#[derive(Debug, Clone)]
pub struct VectorCorpus {
    dimension: usize,
    entries: Vec<LabeledEmbedding>,
    labels: BTreeSet<String>,
}

impl VectorCorpus {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
            labels: BTreeSet::new(),
        }
    }

    /// Hydrate from the store.
    ///
    /// An unreachable store is a `CorpusLoad` error. A store with no labels
    /// yields an empty corpus. Records of the wrong dimension, or holding
    /// non-finite or all-zero vectors, are skipped.
    pub fn load(store: &dyn FaceStore, dimension: usize) -> Result<Self> {
        let records = store
            .load_corpus()
            .map_err(|e| Error::CorpusLoad(e.to_string()))?;

        let mut corpus = Self::new(dimension);
        let mut skipped = 0usize;
        for (label, record) in records {
            if record.vector.len() != dimension {
                warn!(
                    label = %label,
                    id = %record.id,
                    expected = dimension,
                    actual = record.vector.len(),
                    "skipping record with mismatched dimension"
                );
                skipped += 1;
                continue;
            }
            let id = record.id;
            if let Err(e) = corpus.push(record.into_embedding(label)) {
                warn!(id = %id, error = %e, "skipping invalid record");
                skipped += 1;
            }
        }

        info!(
            entries = corpus.len(),
            labels = corpus.labels.len(),
            skipped,
            "corpus loaded"
        );
        Ok(corpus)
    }

    /// Add one entry in memory. Persisting it is the caller's job.
    pub fn append(&mut self, label: impl Into<String>, vector: Vector) -> Result<&LabeledEmbedding> {
        self.push(LabeledEmbedding::new(label, vector))?;
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn push(&mut self, entry: LabeledEmbedding) -> Result<()> {
        validate_label(&entry.label)?;
        if entry.vector.dim() != self.dimension {
            return Err(Error::InvalidDimension {
                expected: self.dimension,
                actual: entry.vector.dim(),
            });
        }
        entry.vector.validate(self.dimension)?;
        self.labels.insert(entry.label.clone());
        self.entries.push(entry);
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn count_for(&self, label: &str) -> usize {
        self.entries.iter().filter(|e| e.label == label).count()
    }

    pub fn entries(&self) -> &[LabeledEmbedding] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LabeledEmbedding> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a VectorCorpus {
    type Item = &'a LabeledEmbedding;
    type IntoIter = std::slice::Iter<'a, LabeledEmbedding>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_append_tracks_labels() {
        let mut corpus = VectorCorpus::new(3);
        corpus.append("alice", Vector::new(vec![1.0, 0.0, 0.0])).unwrap();
        corpus.append("alice", Vector::new(vec![0.9, 0.1, 0.0])).unwrap();
        corpus.append("bob", Vector::new(vec![0.0, 1.0, 0.0])).unwrap();

        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.labels().len(), 2);
        assert_eq!(corpus.count_for("alice"), 2);
        assert_eq!(corpus.iter().next().unwrap().label, "alice");
    }

    #[test]
    fn test_append_rejects_wrong_dimension() {
        let mut corpus = VectorCorpus::new(3);
        let result = corpus.append("alice", Vector::new(vec![1.0, 0.0]));
        assert!(matches!(
            result,
            Err(Error::InvalidDimension { expected: 3, actual: 2 })
        ));
        assert!(corpus.is_empty());
        assert!(corpus.labels().is_empty());
    }

    #[test]
    fn test_append_rejects_degenerate_vectors() {
        let mut corpus = VectorCorpus::new(3);
        assert!(corpus.append("alice", Vector::new(vec![f32::NAN, 0.0, 1.0])).is_err());
        assert!(corpus.append("alice", Vector::new(vec![f32::INFINITY, 0.0, 0.0])).is_err());
        assert!(corpus.append("alice", Vector::new(vec![0.0, 0.0, 0.0])).is_err());
        assert!(corpus.is_empty());
        assert!(corpus.labels().is_empty());
    }

    #[test]
    fn test_load_skips_degenerate_vectors() {
        let store = MemoryStore::with_records(vec![
            ("alice", vec![1.0, 0.0, 0.0]),
            ("bob", vec![0.0, 1.0, 0.0]),
            ("carol", vec![f32::NAN, 0.0, 1.0]),
            ("dave", vec![0.0, 0.0, 0.0]),
        ]);
        let corpus = VectorCorpus::load(&store, 3).unwrap();
        assert_eq!(corpus.len(), 2);
        assert!(!corpus.contains_label("carol"));
        assert!(!corpus.contains_label("dave"));
    }

    #[test]
    fn test_load_empty_store() {
        let store = MemoryStore::new();
        let corpus = VectorCorpus::load(&store, 4).unwrap();
        assert!(corpus.is_empty());
    }

    #[test]
    fn test_load_skips_foreign_dimensions() {
        let store = MemoryStore::with_records(vec![
            ("alice", vec![1.0, 0.0, 0.0]),
            ("alice", vec![1.0, 0.0]),
            ("bob", vec![0.0, 1.0, 0.0]),
        ]);
        let corpus = VectorCorpus::load(&store, 3).unwrap();
        assert_eq!(corpus.len(), 2);
        assert!(corpus.contains_label("bob"));
    }

    #[test]
    fn test_load_unreachable_store() {
        let store = MemoryStore::new();
        store.set_available(false);
        let result = VectorCorpus::load(&store, 3);
        assert!(matches!(result, Err(Error::CorpusLoad(_))));
    }
}
