//! Multinomial logistic regression over normalized embeddings, cached on
//! stable storage and invalidated whenever the corpus label set changes.

use crate::corpus::VectorCorpus;
use crate::store::{CacheSlot, ModelCache};
use crate::{Error, Result, Vector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Bumped whenever [`ClassifierState`] changes shape.
pub const MODEL_FORMAT_VERSION: u32 = 2;

/// Samples per gradient block. Blocks are summed in order so training is
/// reproducible regardless of thread count.
const TRAIN_BLOCK: usize = 64;

/// Bidirectional label <-> class index mapping. Indices follow sorted label order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn from_labels<I: IntoIterator<Item = String>>(labels: I) -> Self {
        let set: BTreeSet<String> = labels.into_iter().collect();
        Self {
            labels: set.into_iter().collect(),
        }
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels
            .binary_search_by(|probe| probe.as_str().cmp(label))
            .ok()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// True iff the table covers exactly `labels`.
    pub fn matches(&self, labels: &BTreeSet<String>) -> bool {
        self.labels.len() == labels.len() && self.labels.iter().zip(labels).all(|(a, b)| a == b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    SoftmaxRegression,
}

/// Serialized classifier slot. Weights are row-major, one row per class.
///
/// `labels` repeats the class order the weights were fitted against, so a
/// classifier slot paired with another model's label table is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierState {
    pub version: u32,
    pub kind: ModelKind,
    pub dimension: usize,
    pub labels: Vec<String>,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

/// Classifier weights plus the label table they were trained against.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    state: ClassifierState,
    labels: LabelTable,
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        self.state.kind
    }

    pub fn dimension(&self) -> usize {
        self.state.dimension
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn label_set(&self) -> BTreeSet<String> {
        self.labels.labels.iter().cloned().collect()
    }

    /// Posterior probability per class index.
    pub fn probabilities(&self, vector: &Vector) -> Result<Vec<f32>> {
        if vector.dim() != self.state.dimension {
            return Err(Error::InvalidDimension {
                expected: self.state.dimension,
                actual: vector.dim(),
            });
        }
        let query = vector.normalized();
        let mut probs = vec![0.0; self.labels.len()];
        softmax_into(
            &self.state.weights,
            &self.state.biases,
            self.state.dimension,
            query.as_slice(),
            &mut probs,
        );
        Ok(probs)
    }

    /// Most probable label and its probability. Ties go to the lowest index.
    pub fn predict(&self, vector: &Vector) -> Result<(&str, f32)> {
        let probs = self.probabilities(vector)?;
        let mut best = 0;
        for (idx, p) in probs.iter().enumerate().skip(1) {
            if *p > probs[best] {
                best = idx;
            }
        }
        let label = self
            .labels
            .label(best)
            .ok_or_else(|| Error::ClassifierTrain("model has no classes".to_string()))?;
        Ok((label, probs[best]))
    }

    /// Encode into the classifier and label-table slots.
    pub fn encode(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((bincode::serialize(&self.state)?, bincode::serialize(&self.labels)?))
    }

    pub fn decode(classifier: &[u8], label_table: &[u8]) -> Result<Self> {
        let state: ClassifierState = bincode::deserialize(classifier)?;
        let labels: LabelTable = bincode::deserialize(label_table)?;

        if state.version != MODEL_FORMAT_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported model format version {}",
                state.version
            )));
        }
        if state.labels != labels.labels {
            return Err(Error::Serialization(
                "classifier slot was trained against a different label table".to_string(),
            ));
        }
        let classes = labels.len();
        if state.biases.len() != classes || state.weights.len() != classes * state.dimension {
            return Err(Error::Serialization(format!(
                "classifier shape does not match {} labels at dimension {}",
                classes, state.dimension
            )));
        }
        Ok(Self { state, labels })
    }
}

/// Gradient descent settings.
#[derive(Debug, Clone, Copy)]
pub struct TrainingParams {
    pub learning_rate: f32,
    pub epochs: usize,
    pub l2: f32,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            epochs: 300,
            l2: 1e-4,
        }
    }
}

/// Where a model handed out by [`ClassifierCache::train_or_load`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOrigin {
    Cache,
    Trained,
}

pub struct ClassifierCache {
    cache: Arc<dyn ModelCache>,
    params: TrainingParams,
}

impl ClassifierCache {
    pub fn new(cache: Arc<dyn ModelCache>) -> Self {
        Self::with_params(cache, TrainingParams::default())
    }

    pub fn with_params(cache: Arc<dyn ModelCache>, params: TrainingParams) -> Self {
        Self { cache, params }
    }

    /// Reuse the cached model when its label set and dimension match the
    /// corpus, otherwise train and cache a new one.
    ///
    /// Blocks for the duration of training. Fails with `ClassifierTrain`
    /// when the corpus has fewer than two labels.
    pub fn train_or_load(&self, corpus: &VectorCorpus) -> Result<(TrainedModel, ModelOrigin)> {
        check_trainable(corpus)?;

        if let Some(model) = self.load_cached() {
            if model.dimension() == corpus.dimension() && model.labels().matches(corpus.labels()) {
                info!(classes = model.labels().len(), "loaded cached classifier");
                return Ok((model, ModelOrigin::Cache));
            }
            info!(
                cached_classes = model.labels().len(),
                corpus_classes = corpus.labels().len(),
                "cached classifier is stale, retraining"
            );
        }

        let model = train(corpus, &self.params)?;
        if let Err(e) = self.save(&model) {
            warn!(error = %e, "failed to cache trained classifier");
        }
        Ok((model, ModelOrigin::Trained))
    }

    pub fn load_cached(&self) -> Option<TrainedModel> {
        let classifier = self.cache.load_slot(CacheSlot::Classifier);
        let label_table = self.cache.load_slot(CacheSlot::LabelTable);
        match (classifier, label_table) {
            (Ok(Some(classifier)), Ok(Some(label_table))) => {
                match TrainedModel::decode(&classifier, &label_table) {
                    Ok(model) => Some(model),
                    Err(e) => {
                        warn!(error = %e, "discarding unreadable classifier cache");
                        None
                    }
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "classifier cache unavailable");
                None
            }
            _ => None,
        }
    }

    pub fn save(&self, model: &TrainedModel) -> Result<()> {
        let (classifier, label_table) = model.encode()?;
        self.cache.store_slot(CacheSlot::LabelTable, &label_table)?;
        self.cache.store_slot(CacheSlot::Classifier, &classifier)?;
        Ok(())
    }
}

fn check_trainable(corpus: &VectorCorpus) -> Result<()> {
    if corpus.is_empty() {
        return Err(Error::ClassifierTrain("corpus is empty".to_string()));
    }
    if corpus.labels().len() < 2 {
        return Err(Error::ClassifierTrain(format!(
            "need at least 2 distinct labels, found {}",
            corpus.labels().len()
        )));
    }
    Ok(())
}

/// Fit a fresh model with full-batch gradient descent from zero weights.
pub fn train(corpus: &VectorCorpus, params: &TrainingParams) -> Result<TrainedModel> {
    check_trainable(corpus)?;

    let started = Instant::now();
    let labels = LabelTable::from_labels(corpus.labels().iter().cloned());
    let dim = corpus.dimension();
    let classes = labels.len();
    let n = corpus.len();

    let mut samples = Vec::with_capacity(n * dim);
    let mut targets = Vec::with_capacity(n);
    for entry in corpus {
        samples.extend_from_slice(entry.vector.normalized().as_slice());
        let target = labels
            .index_of(&entry.label)
            .ok_or_else(|| Error::ClassifierTrain(format!("unindexed label {}", entry.label)))?;
        targets.push(target);
    }

    let mut weights = vec![0.0f32; classes * dim];
    let mut biases = vec![0.0f32; classes];
    let inv_n = 1.0 / n as f32;

    for _ in 0..params.epochs {
        let partials: Vec<(Vec<f32>, Vec<f32>)> = samples
            .par_chunks(TRAIN_BLOCK * dim)
            .zip(targets.par_chunks(TRAIN_BLOCK))
            .map(|(xs, ys)| block_gradient(&weights, &biases, dim, xs, ys))
            .collect();

        let mut grad_w = vec![0.0f32; classes * dim];
        let mut grad_b = vec![0.0f32; classes];
        for (gw, gb) in partials {
            for (acc, g) in grad_w.iter_mut().zip(&gw) {
                *acc += g;
            }
            for (acc, g) in grad_b.iter_mut().zip(&gb) {
                *acc += g;
            }
        }

        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= params.learning_rate * (g * inv_n + params.l2 * *w);
        }
        for (b, g) in biases.iter_mut().zip(&grad_b) {
            *b -= params.learning_rate * g * inv_n;
        }
    }

    debug!(
        samples = n,
        classes,
        epochs = params.epochs,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "classifier trained"
    );

    Ok(TrainedModel {
        state: ClassifierState {
            version: MODEL_FORMAT_VERSION,
            kind: ModelKind::SoftmaxRegression,
            dimension: dim,
            labels: labels.labels.clone(),
            weights,
            biases,
        },
        labels,
    })
}

fn block_gradient(
    weights: &[f32],
    biases: &[f32],
    dim: usize,
    xs: &[f32],
    ys: &[usize],
) -> (Vec<f32>, Vec<f32>) {
    let classes = biases.len();
    let mut grad_w = vec![0.0f32; classes * dim];
    let mut grad_b = vec![0.0f32; classes];
    let mut probs = vec![0.0f32; classes];

    for (x, &y) in xs.chunks_exact(dim).zip(ys) {
        softmax_into(weights, biases, dim, x, &mut probs);
        for (c, p) in probs.iter().enumerate() {
            let g = if c == y { p - 1.0 } else { *p };
            grad_b[c] += g;
            for (gw, xj) in grad_w[c * dim..(c + 1) * dim].iter_mut().zip(x) {
                *gw += g * xj;
            }
        }
    }
    (grad_w, grad_b)
}

fn softmax_into(weights: &[f32], biases: &[f32], dim: usize, x: &[f32], out: &mut [f32]) {
    for (c, logit) in out.iter_mut().enumerate() {
        *logit = crate::simd::dot_product_simd(&weights[c * dim..(c + 1) * dim], x) + biases[c];
    }
    let max = out.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for p in out.iter_mut() {
        *p = (*p - max).exp();
        sum += *p;
    }
    for p in out.iter_mut() {
        *p /= sum;
    }
}
