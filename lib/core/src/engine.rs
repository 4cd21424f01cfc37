//! Process-wide recognition context: one immutable matching snapshot, the
//! throttle ledger and the enrollment sink, constructed once at startup.

use crate::background::{BackgroundJobType, JobStats};
use crate::classifier::{ClassifierCache, ModelOrigin};
use crate::config::EngineConfig;
use crate::corpus::VectorCorpus;
use crate::embedding::LabeledEmbedding;
use crate::enrollment::EnrollmentSink;
use crate::resolver::{DecisionMode, Identity, IdentityDecision, IdentityResolver};
use crate::store::{FaceStore, ModelCache};
use crate::throttle::{ActionKind, ThrottleLedger};
use crate::{Result, Vector};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Ledger key for faces that matched nobody. Labels cannot contain `/`.
const UNRECOGNIZED_KEY: &str = "/unrecognized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A face located in a frame.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub crop: RgbImage,
}

/// Face detection and embedding model.
pub trait FaceExtractor {
    fn extract_faces(&self, frame: &RgbImage) -> Result<Vec<DetectedFace>>;
    fn embed(&self, crop: &RgbImage) -> Result<Vec<f32>>;
}

/// What happened to one observed face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub decision: IdentityDecision,
    pub persist_scheduled: bool,
    pub log_scheduled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceOutcome {
    pub bounding_box: BoundingBox,
    pub observation: Observation,
}

/// Corpus plus the matchers built from it. Swapped whole on rebuild.
struct Snapshot {
    corpus: VectorCorpus,
    resolver: IdentityResolver,
    model_origin: Option<ModelOrigin>,
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn FaceStore>,
    classifier: ClassifierCache,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Corpus including enrollments not yet rebuilt into the snapshot
    pending: Mutex<VectorCorpus>,
    /// Enrollments not yet seen in the store, kept across reloads
    unconfirmed: Mutex<Vec<LabeledEmbedding>>,
    rebuild_lock: Mutex<()>,
    ledger: ThrottleLedger,
    sink: EnrollmentSink,
}

impl Engine {
    /// Load the corpus, fit or load the classifier, build the index and
    /// start the background writers.
    ///
    /// Only an unreachable store (`CorpusLoad`) or invalid configuration
    /// fails startup.
    pub fn init(
        config: EngineConfig,
        store: Arc<dyn FaceStore>,
        cache: Arc<dyn ModelCache>,
    ) -> Result<Self> {
        Self::with_classifier(config, store, ClassifierCache::new(cache))
    }

    pub fn with_classifier(
        config: EngineConfig,
        store: Arc<dyn FaceStore>,
        classifier: ClassifierCache,
    ) -> Result<Self> {
        config.validate()?;
        let corpus = VectorCorpus::load(store.as_ref(), config.dimension)?;
        let snapshot = build_snapshot(corpus.clone(), &classifier, &config)?;
        let sink = EnrollmentSink::new(store.clone(), config.workers, config.queue_capacity)?;

        info!(
            labels = snapshot.corpus.labels().len(),
            entries = snapshot.corpus.len(),
            mode = ?snapshot.resolver.mode(),
            "engine initialized"
        );

        Ok(Self {
            config,
            store,
            classifier,
            snapshot: RwLock::new(Arc::new(snapshot)),
            pending: Mutex::new(corpus),
            unconfirmed: Mutex::new(Vec::new()),
            rebuild_lock: Mutex::new(()),
            ledger: ThrottleLedger::new(),
            sink,
        })
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn FaceStore> {
        &self.store
    }

    pub fn ledger(&self) -> &ThrottleLedger {
        &self.ledger
    }

    /// Labels matchable right now.
    pub fn labels(&self) -> BTreeSet<String> {
        self.current().corpus.labels().clone()
    }

    pub fn corpus_len(&self) -> usize {
        self.current().corpus.len()
    }

    pub fn mode(&self) -> DecisionMode {
        self.current().resolver.mode()
    }

    pub fn model_origin(&self) -> Option<ModelOrigin> {
        self.current().model_origin
    }

    /// Label set of the active classifier, if there is one.
    pub fn model_labels(&self) -> Option<BTreeSet<String>> {
        self.current().resolver.model().map(|m| m.label_set())
    }

    pub fn sink_stats(&self, job_type: BackgroundJobType) -> JobStats {
        self.sink.stats(job_type)
    }

    /// Decide without side effects.
    pub fn resolve(&self, embedding: &Vector) -> Result<IdentityDecision> {
        self.current().resolver.resolve(embedding)
    }

    pub fn observe(&self, crop: &RgbImage, embedding: Vector) -> Result<Observation> {
        self.observe_at(crop, embedding, Instant::now())
    }

    /// Resolve one face and schedule whatever the throttle allows.
    ///
    /// Recognized faces are stored under their label and logged. Unknown
    /// faces go to the unrecognized bucket and are never logged.
    pub fn observe_at(&self, crop: &RgbImage, embedding: Vector, now: Instant) -> Result<Observation> {
        let decision = self.resolve(&embedding)?;
        let config = &self.config;

        let (persist_scheduled, log_scheduled) = match &decision.identity {
            Identity::Known(label) => {
                let persist = self
                    .ledger
                    .should_act(label, ActionKind::Persist, now, config.persist_window)
                    && self.sink.persist_async(crop.clone(), label, &embedding, true);
                let log = self
                    .ledger
                    .should_act(label, ActionKind::Log, now, config.log_window)
                    && self.sink.log_event_async(label, decision.confidence);
                (persist, log)
            }
            Identity::Unknown => {
                let persist = config.persist_unrecognized
                    && self.ledger.should_act(
                        UNRECOGNIZED_KEY,
                        ActionKind::Persist,
                        now,
                        config.persist_window,
                    )
                    && self.sink.persist_async(crop.clone(), UNRECOGNIZED_KEY, &embedding, false);
                (persist, false)
            }
        };

        Ok(Observation {
            decision,
            persist_scheduled,
            log_scheduled,
        })
    }

    /// Handle one captured frame. Frames off the sampling cadence are
    /// ignored; faces are handled in detection order and any face that
    /// cannot be embedded or resolved is skipped.
    pub fn process_frame(
        &self,
        frame_index: u64,
        frame: &RgbImage,
        extractor: &dyn FaceExtractor,
    ) -> Vec<FaceOutcome> {
        if frame_index % self.config.frame_sample_interval != 0 {
            return Vec::new();
        }

        let faces = match extractor.extract_faces(frame) {
            Ok(faces) => faces,
            Err(e) => {
                warn!(frame_index, error = %e, "face extraction failed");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::with_capacity(faces.len());
        for face in faces {
            let embedding = match extractor.embed(&face.crop) {
                Ok(v) => Vector::new(v),
                Err(e) => {
                    debug!(frame_index, error = %e, "skipping face, embedding failed");
                    continue;
                }
            };
            match self.observe(&face.crop, embedding) {
                Ok(observation) => outcomes.push(FaceOutcome {
                    bounding_box: face.bounding_box,
                    observation,
                }),
                Err(e) => debug!(frame_index, error = %e, "skipping face"),
            }
        }
        outcomes
    }

    /// Add a labeled observation and persist it in the background.
    ///
    /// The label becomes matchable only after [`Engine::rebuild`]. An
    /// enrollment whose write was dropped or failed stays in memory and is
    /// carried over by [`Engine::reload`].
    pub fn enroll(&self, label: &str, image: RgbImage, embedding: Vector) -> Result<bool> {
        embedding.validate(self.config.dimension)?;
        let entry = self.pending.lock().append(label, embedding.clone())?.clone();
        self.unconfirmed.lock().push(entry);
        Ok(self.sink.persist_async(image, label, &embedding, true))
    }

    /// Retrain (or reload) the classifier and rebuild the index over every
    /// enrollment so far, then swap the snapshot in.
    pub fn rebuild(&self) -> Result<()> {
        let _guard = self.rebuild_lock.lock();
        let corpus = self.pending.lock().clone();
        self.install(corpus)
    }

    /// Re-read the corpus from the store and rebuild.
    ///
    /// Queued writes are flushed first. Enrollments the store still lacks
    /// afterwards are appended to the loaded corpus.
    pub fn reload(&self) -> Result<()> {
        let _guard = self.rebuild_lock.lock();
        self.sink.flush();
        let mut corpus = VectorCorpus::load(self.store.as_ref(), self.config.dimension)?;

        let mut unconfirmed = self.unconfirmed.lock();
        unconfirmed.retain(|entry| {
            !corpus
                .iter()
                .any(|stored| stored.label == entry.label && stored.vector == entry.vector)
        });
        for entry in unconfirmed.iter() {
            corpus.push(entry.clone())?;
        }
        if !unconfirmed.is_empty() {
            warn!(
                entries = unconfirmed.len(),
                "enrollments missing from the store were kept in memory"
            );
        }
        drop(unconfirmed);

        *self.pending.lock() = corpus.clone();
        self.install(corpus)
    }

    fn install(&self, corpus: VectorCorpus) -> Result<()> {
        let snapshot = build_snapshot(corpus, &self.classifier, &self.config)?;
        info!(
            labels = snapshot.corpus.labels().len(),
            entries = snapshot.corpus.len(),
            mode = ?snapshot.resolver.mode(),
            "matching snapshot rebuilt"
        );
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(())
    }

    /// Drain pending writes and stop the background workers.
    pub fn shutdown(&self) {
        self.sink.shutdown();
    }
}

fn build_snapshot(
    corpus: VectorCorpus,
    classifier: &ClassifierCache,
    config: &EngineConfig,
) -> Result<Snapshot> {
    let (resolver, model_origin) = IdentityResolver::build(&corpus, classifier, config.thresholds())?;
    Ok(Snapshot {
        corpus,
        resolver,
        model_origin,
    })
}
