//! # visage
//!
//! A live face identification engine.
//!
//! visage decides who is in front of a camera from face embeddings. Each
//! embedding goes through two gates: a softmax classifier fitted over the
//! enrolled corpus, and an exact cosine nearest-neighbor search over the same
//! corpus. A face is recognized only when both agree strongly enough;
//! everything else is Unknown.
//!
//! Recognized faces are stored and logged at most once per label per window,
//! off the frame path, so the corpus keeps growing while the camera runs.
//!
//! ## Quick Start
//!
//! ### As a CLI
//!
//! ```bash
//! visage --data-dir ./data --dimension 512 stats
//! visage --data-dir ./data enroll --label alice --vector alice.json --image alice.jpg
//! visage --data-dir ./data identify --vector probe.json
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use visage::prelude::*;
//!
//! let store = Arc::new(LocalStore::open("./data").unwrap());
//! let cache = store.model_cache();
//! let engine = Engine::init(EngineConfig::default(), store, cache).unwrap();
//!
//! let probe = Vector::new(vec![0.1; 512]);
//! let decision = engine.resolve(&probe).unwrap();
//! println!("{} ({:.2}/{:.2})", decision.identity, decision.confidence, decision.similarity);
//! engine.shutdown();
//! ```
//!
//! ## Crate Structure
//!
//! - `visage-core` - Corpus, classifier cache, similarity index, resolver, throttle, background writers
//! - `visage-storage` - LMDB records, filesystem blobs, classifier cache files

// Re-export core types
pub use visage_core::{
    Bucket, ClassifierCache, DecisionMode, DetectedFace, Engine, EngineConfig, Error,
    FaceExtractor, FaceOutcome, FaceRecord, FaceStore, Identity, IdentityDecision,
    IdentityResolver, MemoryModelCache, MemoryStore, ModelCache, ModelOrigin, Observation,
    Result, SimilarityIndex, Thresholds, Vector, VectorCorpus,
};

// Re-export storage
pub use visage_storage::{FileModelCache, LocalStore};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Engine, EngineConfig, Error, FaceExtractor, FaceStore, FileModelCache, Identity,
        IdentityDecision, LocalStore, MemoryModelCache, MemoryStore, ModelCache, Result, Vector,
    };
}
