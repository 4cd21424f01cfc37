use crate::classifier::{ClassifierCache, ModelOrigin, TrainedModel};
use crate::corpus::VectorCorpus;
use crate::index::SimilarityIndex;
use crate::{Result, Vector};
use serde::Serialize;
use tracing::{debug, warn};

/// Identity attached to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Identity::Known(label) => Some(label),
            Identity::Unknown => None,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Known(label) => write!(f, "{}", label),
            Identity::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Which policy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    /// Classifier confidence and nearest-neighbor similarity both gated
    DualGate,
    /// Fewer than two labels; nearest neighbor alone
    SimilarityOnly,
    /// Nothing enrolled yet
    EmptyCorpus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityDecision {
    pub identity: Identity,
    /// Classifier posterior in `[0, 1]`
    pub confidence: f32,
    /// `1 - cosine_distance` to the nearest stored vector, in `[-1, 1]`
    pub similarity: f32,
    pub mode: DecisionMode,
}

/// Acceptance gates. A value exactly at a threshold passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    pub similarity: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.60,
            similarity: 0.70,
        }
    }
}

impl Thresholds {
    #[inline]
    pub fn accepts(&self, confidence: f32, similarity: f32) -> bool {
        confidence >= self.confidence && similarity >= self.similarity
    }
}

/// Turns one embedding into an identity decision.
///
/// Holds the classifier and index built from a single corpus snapshot.
/// Without a classifier it falls back to similarity-only matching; without
/// an index every face is Unknown.
pub struct IdentityResolver {
    dimension: usize,
    thresholds: Thresholds,
    model: Option<TrainedModel>,
    index: Option<SimilarityIndex>,
}

impl IdentityResolver {
    pub fn new(
        dimension: usize,
        thresholds: Thresholds,
        model: Option<TrainedModel>,
        index: Option<SimilarityIndex>,
    ) -> Self {
        Self {
            dimension,
            thresholds,
            model,
            index,
        }
    }

    /// Train or load the classifier and build the index for `corpus`.
    ///
    /// Classifier failures downgrade to similarity-only matching and are
    /// never returned.
    pub fn build(
        corpus: &VectorCorpus,
        classifier: &ClassifierCache,
        thresholds: Thresholds,
    ) -> Result<(Self, Option<ModelOrigin>)> {
        let (model, origin) = match classifier.train_or_load(corpus) {
            Ok((model, origin)) => (Some(model), Some(origin)),
            Err(e) => {
                warn!(error = %e, "classifier unavailable, using similarity-only matching");
                (None, None)
            }
        };

        let index = if corpus.is_empty() {
            None
        } else {
            Some(SimilarityIndex::build(corpus)?)
        };

        Ok((Self::new(corpus.dimension(), thresholds, model, index), origin))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    pub fn mode(&self) -> DecisionMode {
        match (&self.model, &self.index) {
            (_, None) => DecisionMode::EmptyCorpus,
            (None, Some(_)) => DecisionMode::SimilarityOnly,
            (Some(_), Some(_)) => DecisionMode::DualGate,
        }
    }

    /// Fails only with `InvalidEmbedding`; callers skip that detection.
    pub fn resolve(&self, vector: &Vector) -> Result<IdentityDecision> {
        vector.validate(self.dimension)?;

        let index = match &self.index {
            Some(index) => index,
            None => return Ok(self.decide(None, None)),
        };

        let nearest = index.nearest(vector)?;
        let prediction = match &self.model {
            Some(model) => Some(model.predict(vector)?),
            None => None,
        };

        let decision = self.decide(prediction, Some(nearest));
        debug!(
            identity = %decision.identity,
            confidence = decision.confidence,
            similarity = decision.similarity,
            mode = ?decision.mode,
            "resolved embedding"
        );
        Ok(decision)
    }

    /// Apply the gates to a classifier prediction and a nearest neighbor.
    fn decide(&self, prediction: Option<(&str, f32)>, nearest: Option<(&str, f32)>) -> IdentityDecision {
        let Some((nearest_label, similarity)) = nearest else {
            return IdentityDecision {
                identity: Identity::Unknown,
                confidence: 0.0,
                similarity: 0.0,
                mode: DecisionMode::EmptyCorpus,
            };
        };

        match prediction {
            Some((predicted_label, confidence)) => {
                let identity = if self.thresholds.accepts(confidence, similarity) {
                    Identity::Known(predicted_label.to_string())
                } else {
                    Identity::Unknown
                };
                IdentityDecision {
                    identity,
                    confidence,
                    similarity,
                    mode: DecisionMode::DualGate,
                }
            }
            None => {
                let identity = if similarity >= self.thresholds.similarity {
                    Identity::Known(nearest_label.to_string())
                } else {
                    Identity::Unknown
                };
                IdentityDecision {
                    identity,
                    confidence: similarity.clamp(0.0, 1.0),
                    similarity,
                    mode: DecisionMode::SimilarityOnly,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryModelCache;
    use crate::Error;
    use std::sync::Arc;

    fn scenario_corpus() -> VectorCorpus {
        let mut corpus = VectorCorpus::new(4);
        corpus.append("A", Vector::new(vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        corpus.append("A", Vector::new(vec![0.9, 0.1, 0.0, 0.0])).unwrap();
        corpus.append("B", Vector::new(vec![0.0, 1.0, 0.0, 0.0])).unwrap();
        corpus
    }

    fn resolver_for(corpus: &VectorCorpus) -> IdentityResolver {
        let classifier = ClassifierCache::new(Arc::new(MemoryModelCache::new()));
        IdentityResolver::build(corpus, &classifier, Thresholds::default())
            .unwrap()
            .0
    }

    fn bare() -> IdentityResolver {
        IdentityResolver::new(4, Thresholds::default(), None, None)
    }

    #[test]
    fn test_threshold_composition() {
        let resolver = bare();
        let grid = [0.0f32, 0.59, 0.60, 0.61, 0.69, 0.70, 0.71, 1.0];
        for &c in &grid {
            for &s in &grid {
                let decision = resolver.decide(Some(("A", c)), Some(("A", s)));
                let expected = c >= 0.60 && s >= 0.70;
                assert_eq!(decision.identity.is_known(), expected, "c={} s={}", c, s);
                assert_eq!(decision.mode, DecisionMode::DualGate);
            }
        }
    }

    #[test]
    fn test_exact_boundary_passes() {
        let decision = bare().decide(Some(("A", 0.60)), Some(("B", 0.70)));
        assert_eq!(decision.identity, Identity::Known("A".to_string()));
    }

    #[test]
    fn test_similarity_only_fallback() {
        let resolver = bare();
        let accepted = resolver.decide(None, Some(("A", 0.70)));
        assert_eq!(accepted.identity, Identity::Known("A".to_string()));
        assert_eq!(accepted.mode, DecisionMode::SimilarityOnly);
        assert!((accepted.confidence - 0.70).abs() < 1e-6);

        let rejected = resolver.decide(None, Some(("A", 0.69)));
        assert_eq!(rejected.identity, Identity::Unknown);

        let negative = resolver.decide(None, Some(("A", -0.4)));
        assert_eq!(negative.confidence, 0.0);
    }

    #[test]
    fn test_scenario_query_matches_stored_vector() {
        let resolver = resolver_for(&scenario_corpus());
        assert_eq!(resolver.mode(), DecisionMode::DualGate);

        let decision = resolver.resolve(&Vector::new(vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        assert_eq!(decision.identity, Identity::Known("A".to_string()));
        assert!(decision.confidence > 0.95);
        assert!((decision.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_scenario_orthogonal_query_is_unknown() {
        let resolver = resolver_for(&scenario_corpus());
        let decision = resolver.resolve(&Vector::new(vec![0.0, 0.0, 0.0, 1.0])).unwrap();
        assert_eq!(decision.identity, Identity::Unknown);
        assert!(decision.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_single_label_corpus_uses_similarity() {
        let mut corpus = VectorCorpus::new(4);
        corpus.append("A", Vector::new(vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        let resolver = resolver_for(&corpus);
        assert_eq!(resolver.mode(), DecisionMode::SimilarityOnly);

        let decision = resolver.resolve(&Vector::new(vec![1.0, 0.1, 0.0, 0.0])).unwrap();
        assert_eq!(decision.identity, Identity::Known("A".to_string()));

        let decision = resolver.resolve(&Vector::new(vec![0.0, 1.0, 0.0, 0.0])).unwrap();
        assert_eq!(decision.identity, Identity::Unknown);
    }

    #[test]
    fn test_empty_corpus_never_errors() {
        let resolver = resolver_for(&VectorCorpus::new(4));
        assert_eq!(resolver.mode(), DecisionMode::EmptyCorpus);

        let decision = resolver.resolve(&Vector::new(vec![0.2, 0.4, 0.1, 0.3])).unwrap();
        assert_eq!(decision.identity, Identity::Unknown);
        assert_eq!(decision.mode, DecisionMode::EmptyCorpus);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_invalid_embedding() {
        let resolver = resolver_for(&scenario_corpus());
        assert!(matches!(
            resolver.resolve(&Vector::new(vec![0.0; 4])),
            Err(Error::InvalidEmbedding(_))
        ));
        assert!(matches!(
            resolver.resolve(&Vector::new(vec![1.0; 3])),
            Err(Error::InvalidEmbedding(_))
        ));
    }
}
