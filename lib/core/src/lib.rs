//! # visage Core
//!
//! Core library for the visage face identification engine.
//!
//! This crate provides the recognition pipeline behind a live camera feed:
//!
//! - [`VectorCorpus`] - Labeled embeddings loaded from a [`FaceStore`]
//! - [`ClassifierCache`] - Softmax classifier, trained or loaded from a [`ModelCache`]
//! - [`SimilarityIndex`] - Exact cosine nearest-neighbor search
//! - [`IdentityResolver`] - Dual-gate decision over classifier and index
//! - [`ThrottleLedger`] - Per-label rate limiting of persistence and logging
//! - [`EnrollmentSink`] - Background writes to the store
//! - [`Engine`] - All of the above behind one process-wide context
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use visage_core::{Engine, EngineConfig, Identity, MemoryModelCache, MemoryStore, Vector};
//!
//! let store = Arc::new(MemoryStore::with_records(vec![
//!     ("alice", vec![1.0, 0.0, 0.0]),
//!     ("bob", vec![0.0, 1.0, 0.0]),
//! ]));
//! let config = EngineConfig { dimension: 3, ..EngineConfig::default() };
//! let engine = Engine::init(config, store, Arc::new(MemoryModelCache::new())).unwrap();
//!
//! let decision = engine.resolve(&Vector::new(vec![1.0, 0.0, 0.0])).unwrap();
//! assert_eq!(decision.identity, Identity::Known("alice".to_string()));
//! engine.shutdown();
//! ```

pub mod background;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod engine;
pub mod enrollment;
pub mod error;
pub mod index;
pub mod resolver;
pub mod store;
pub mod throttle;
pub mod vector;

/// SIMD-optimized vector operations
///
/// Provides hardware-accelerated dot products:
/// - AVX2/FMA on x86_64
/// - Unrolled scalar fallback elsewhere
pub mod simd;

pub use background::{BackgroundJobType, JobStats};
pub use classifier::{ClassifierCache, LabelTable, ModelOrigin, TrainedModel, TrainingParams};
pub use config::EngineConfig;
pub use corpus::VectorCorpus;
pub use embedding::{validate_label, Bucket, DetectionRecord, FaceRecord, LabeledEmbedding, Profile};
pub use engine::{BoundingBox, DetectedFace, Engine, FaceExtractor, FaceOutcome, Observation};
pub use enrollment::EnrollmentSink;
pub use error::{Error, Result};
pub use index::SimilarityIndex;
pub use resolver::{DecisionMode, Identity, IdentityDecision, IdentityResolver, Thresholds};
pub use store::{CacheSlot, FaceStore, MemoryModelCache, MemoryStore, ModelCache};
pub use throttle::{ActionKind, ThrottleLedger};
pub use vector::Vector;
