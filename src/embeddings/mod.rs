// Embeddings module
// Text chunking and the embedding service client


pub mod chunking;
pub mod ollama;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use tracing::debug;

use crate::{RagError, Result};

pub use chunking::{ChunkingConfig, ContentChunk, TextChunker, chunk_identity};
pub use ollama::OllamaClient;

/// Converts text into fixed-dimensionality vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed every text in order, one request at a time
    ///
    /// Stops at the first failure and reports the index of the failing item.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let vector = self
                .embed(text)
                .await
                .map_err(|source| RagError::BatchEmbedding {
                    index,
                    source: Box::new(source),
                })?;
            vectors.push(vector);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str;
}

/// Embed `texts` with up to `concurrency` requests in flight
///
/// Results come back in input order. A concurrency of 1 behaves like
/// [`Embedder::embed_batch`].
#[inline]
pub async fn embed_all(
    embedder: &dyn Embedder,
    texts: &[String],
    concurrency: usize,
) -> Result<Vec<Vec<f32>>> {
    if concurrency <= 1 {
        return embedder.embed_batch(texts).await;
    }

    debug!(
        "Embedding {} texts with {} concurrent requests",
        texts.len(),
        concurrency
    );

    stream::iter(texts.iter().enumerate())
        .map(|(index, text)| async move {
            embedder
                .embed(text)
                .await
                .map_err(|source| RagError::BatchEmbedding {
                    index,
                    source: Box::new(source),
                })
        })
        .buffered(concurrency)
        .try_collect()
        .await
}
