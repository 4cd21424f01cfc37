pub mod blob;
pub mod lmdb_storage;
pub mod model_cache;
pub mod store;

pub use blob::BlobStore;
pub use lmdb_storage::LmdbStorage;
pub use model_cache::FileModelCache;
pub use store::LocalStore;
