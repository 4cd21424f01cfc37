use crate::resolver::Thresholds;
use crate::{Error, Result};
use std::time::Duration;

/// Runtime configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub confidence_threshold: f32,
    pub similarity_threshold: f32,
    /// Minimum interval between stored images of the same label
    pub persist_window: Duration,
    /// Minimum interval between detection logs of the same label
    pub log_window: Duration,
    /// Store Unknown faces in the unrecognized bucket
    pub persist_unrecognized: bool,
    /// Process every Nth frame
    pub frame_sample_interval: u64,
    /// Embedding dimension produced by the extractor
    pub dimension: usize,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.60,
            similarity_threshold: 0.70,
            persist_window: Duration::from_secs(600),
            log_window: Duration::from_secs(600),
            persist_unrecognized: true,
            frame_sample_interval: 5,
            dimension: 512,
            workers: 2,
            queue_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            confidence: self.confidence_threshold,
            similarity: self.similarity_threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::InvalidConfig(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::InvalidConfig(format!(
                "similarity_threshold must be in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.dimension == 0 {
            return Err(Error::InvalidConfig("dimension must be positive".to_string()));
        }
        if self.frame_sample_interval == 0 {
            return Err(Error::InvalidConfig(
                "frame_sample_interval must be positive".to_string(),
            ));
        }
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "workers and queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
