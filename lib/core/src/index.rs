use crate::corpus::VectorCorpus;
use crate::{Error, Result, Vector};
use rayon::prelude::*;
use std::collections::HashMap;

/// Corpora at least this large are scanned in parallel.
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

/// Exact 1-nearest-neighbor index by cosine distance.
///
/// Built from one corpus snapshot and never mutated; an enrollment needs a
/// fresh build before the new vectors are searchable.
/// Optimized with:
/// - Contiguous, pre-normalized vector storage so each probe is one dot product
/// - Label interning so a hit costs a u32 lookup
pub struct SimilarityIndex {
    dim: usize,
    /// Unit-length vectors, `dim` floats per entry
    vectors: Vec<f32>,
    /// Per-entry index into `names`
    label_ids: Vec<u32>,
    names: Vec<String>,
}

#[derive(Clone, Copy)]
struct Hit {
    position: usize,
    score: f32,
}

impl Hit {
    /// Higher score wins; equal scores keep the earlier entry.
    #[inline]
    fn better(self, other: Hit) -> Hit {
        if other.score > self.score || (other.score == self.score && other.position < self.position) {
            other
        } else {
            self
        }
    }
}

impl SimilarityIndex {
    pub fn build(corpus: &VectorCorpus) -> Result<Self> {
        if corpus.is_empty() {
            return Err(Error::EmptyIndex);
        }

        let dim = corpus.dimension();
        let mut vectors = Vec::with_capacity(corpus.len() * dim);
        let mut label_ids = Vec::with_capacity(corpus.len());
        let mut names: Vec<String> = Vec::new();
        let mut interned: HashMap<&str, u32> = HashMap::new();

        for entry in corpus {
            vectors.extend_from_slice(entry.vector.normalized().as_slice());
            let id = *interned.entry(entry.label.as_str()).or_insert_with(|| {
                names.push(entry.label.clone());
                (names.len() - 1) as u32
            });
            label_ids.push(id);
        }

        Ok(Self {
            dim,
            vectors,
            label_ids,
            names,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.label_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_ids.is_empty()
    }

    /// Label of the closest stored vector and `1 - cosine_distance`.
    pub fn nearest(&self, query: &Vector) -> Result<(&str, f32)> {
        if query.dim() != self.dim {
            return Err(Error::InvalidDimension {
                expected: self.dim,
                actual: query.dim(),
            });
        }

        let query = query.normalized();
        let q = query.as_slice();
        let score = |(position, v): (usize, &[f32])| Hit {
            position,
            score: crate::simd::dot_product_simd(q, v),
        };
        let start = Hit {
            position: usize::MAX,
            score: f32::NEG_INFINITY,
        };

        let best = if self.len() >= PARALLEL_SCAN_THRESHOLD {
            self.vectors
                .par_chunks_exact(self.dim)
                .enumerate()
                .map(score)
                .reduce(|| start, Hit::better)
        } else {
            self.vectors
                .chunks_exact(self.dim)
                .enumerate()
                .map(score)
                .fold(start, Hit::better)
        };

        let label = self
            .label_ids
            .get(best.position)
            .map(|&id| self.names[id as usize].as_str())
            .ok_or(Error::EmptyIndex)?;
        Ok((label, best.score.clamp(-1.0, 1.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> VectorCorpus {
        let mut corpus = VectorCorpus::new(3);
        corpus.append("A", Vector::new(vec![1.0, 0.0, 0.0])).unwrap();
        corpus.append("A", Vector::new(vec![0.9, 0.1, 0.0])).unwrap();
        corpus.append("B", Vector::new(vec![0.0, 1.0, 0.0])).unwrap();
        corpus
    }

    #[test]
    fn test_empty_corpus_is_an_error() {
        assert!(matches!(
            SimilarityIndex::build(&VectorCorpus::new(3)),
            Err(Error::EmptyIndex)
        ));
    }

    #[test]
    fn test_identical_vector_scores_one() {
        let index = SimilarityIndex::build(&corpus()).unwrap();
        let (label, similarity) = index.nearest(&Vector::new(vec![0.0, 1.0, 0.0])).unwrap();
        assert_eq!(label, "B");
        assert!((similarity - 1.0).abs() < 1e-6);

        // Scale does not matter for cosine.
        let (label, similarity) = index.nearest(&Vector::new(vec![5.0, 0.0, 0.0])).unwrap();
        assert_eq!(label, "A");
        assert!((similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_query() {
        let index = SimilarityIndex::build(&corpus()).unwrap();
        let (_, similarity) = index.nearest(&Vector::new(vec![0.0, 0.0, 1.0])).unwrap();
        assert!(similarity.abs() < 1e-6);
    }

    #[test]
    fn test_tie_prefers_earliest_entry() {
        let mut corpus = VectorCorpus::new(2);
        corpus.append("first", Vector::new(vec![1.0, 0.0])).unwrap();
        corpus.append("second", Vector::new(vec![2.0, 0.0])).unwrap();
        let index = SimilarityIndex::build(&corpus).unwrap();
        let (label, _) = index.nearest(&Vector::new(vec![1.0, 0.0])).unwrap();
        assert_eq!(label, "first");
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = SimilarityIndex::build(&corpus()).unwrap();
        assert!(matches!(
            index.nearest(&Vector::new(vec![1.0, 0.0])),
            Err(Error::InvalidDimension { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_parallel_scan_matches_target() {
        let dim = 8;
        let mut corpus = VectorCorpus::new(dim);
        for i in 0..PARALLEL_SCAN_THRESHOLD + 10 {
            let v: Vec<f32> = (0..dim).map(|j| ((i * 31 + j * 7) % 97) as f32 + 1.0).collect();
            corpus.append(format!("p{}", i), Vector::new(v)).unwrap();
        }
        let target = corpus.entries()[1234].clone();
        let index = SimilarityIndex::build(&corpus).unwrap();
        let (label, similarity) = index.nearest(&target.vector).unwrap();
        assert!((similarity - 1.0).abs() < 1e-5);
        // Another entry may be parallel to the target; it must still score 1.
        let found = corpus.iter().find(|e| e.label == label).unwrap();
        assert!((found.vector.cosine_similarity(&target.vector) - 1.0).abs() < 1e-5);
    }
}
