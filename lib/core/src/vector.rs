use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A face embedding as produced by the feature extractor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    #[inline]
    #[must_use]
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    #[inline]
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Check that the vector can be matched against a corpus of `expected_dim`.
    ///
    /// Rejects wrong dimensions, NaN/infinite components and zero-norm
    /// vectors (the extractor returns all zeros when it fails silently).
    pub fn validate(&self, expected_dim: usize) -> Result<()> {
        if self.dim() != expected_dim {
            return Err(Error::InvalidEmbedding(format!(
                "expected dimension {}, got {}",
                expected_dim,
                self.dim()
            )));
        }
        if let Some(pos) = self.data.iter().position(|x| !x.is_finite()) {
            return Err(Error::InvalidEmbedding(format!(
                "non-finite component at index {}",
                pos
            )));
        }
        if crate::simd::norm_simd(&self.data) <= f32::EPSILON {
            return Err(Error::InvalidEmbedding("degenerate zero-norm vector".to_string()));
        }
        Ok(())
    }

    /// Compute cosine similarity with another vector
    #[inline]
    pub fn cosine_similarity(&self, other: &Vector) -> f32 {
        if self.dim() != other.dim() {
            return 0.0;
        }

        let dot_product = crate::simd::dot_product_simd(&self.data, &other.data);
        let norm_a = crate::simd::norm_simd(&self.data);
        let norm_b = crate::simd::norm_simd(&other.data);

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }

    /// Normalize the vector to unit length
    #[inline]
    pub fn normalize(&mut self) {
        let norm = crate::simd::norm_simd(&self.data);
        if norm > f32::EPSILON {
            let inv_norm = 1.0 / norm;
            for x in &mut self.data {
                *x *= inv_norm;
            }
        }
    }

    /// Get normalized copy
    #[inline]
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut v = self.clone();
        v.normalize();
        v
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Vector::new(data)
    }
}
