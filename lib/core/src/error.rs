use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The store could not be read at startup. No recognition is possible.
    #[error("Corpus load failed: {0}")]
    CorpusLoad(String),

    /// Not enough label diversity to fit a classifier.
    #[error("Classifier training failed: {0}")]
    ClassifierTrain(String),

    /// The extractor produced a vector that cannot be matched.
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Invalid label: {0:?}")]
    InvalidLabel(String),

    #[error("Similarity index is empty")]
    EmptyIndex,

    #[error("Label not found: {0}")]
    LabelNotFound(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A background write failed. Never surfaced to the frame path.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Serialization(e.to_string())
    }
}
