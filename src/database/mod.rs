// Database module
// Persistent vector index for document chunks

pub mod lancedb;

pub use self::lancedb::vector_store::{DeleteTarget, SearchResult, StoreStats, VectorStore};
pub use self::lancedb::{ChunkMetadata, EmbeddingRecord};
