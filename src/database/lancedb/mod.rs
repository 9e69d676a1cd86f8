// LanceDB vector database module
// Handles vector storage and similarity search for chunk embeddings

#[cfg(test)]
mod tests;

pub mod vector_store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::embeddings::chunking::ContentChunk;

/// Record persisted in the vector index, keyed by chunk identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Stable identity, `{source}_{chunk_index}`
    pub id: String,
    /// The vector embedding; dimension is fixed per collection
    pub vector: Vec<f32>,
    /// The chunk text
    pub content: String,
    /// Provenance of the chunk
    pub metadata: ChunkMetadata,
}

/// Metadata stored alongside each embedding
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// File name of the source document
    pub source: String,
    /// Absolute path of the source document
    pub file_path: String,
    /// Position of the chunk within its source
    pub chunk_index: u32,
    /// Loader-specific attributes (format, ...)
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl EmbeddingRecord {
    #[inline]
    pub fn from_chunk(chunk: &ContentChunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.identity(),
            vector,
            content: chunk.content.clone(),
            metadata: ChunkMetadata {
                source: chunk.metadata.source.clone(),
                file_path: chunk.metadata.file_path.clone(),
                chunk_index: u32::try_from(chunk.chunk_index).unwrap_or(u32::MAX),
                extra: chunk.metadata.extra.clone(),
            },
        }
    }
}
