// Retrieval module
// Query embedding, similarity search, threshold filtering and context assembly


use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;
use crate::database::{SearchResult, VectorStore};
use crate::embeddings::Embedder;

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of nearest chunks requested from the store
    pub top_k: usize,
    /// Minimum score a chunk needs to be kept (inclusive)
    pub similarity_threshold: f32,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 8,
            similarity_threshold: 0.3,
        }
    }
}

/// Outcome of a retrieval: matches above the threshold, or nothing relevant
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Found(Vec<SearchResult>),
    Empty,
}

impl Retrieval {
    #[inline]
    pub fn results(&self) -> &[SearchResult] {
        match self {
            Self::Found(results) => results,
            Self::Empty => &[],
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Citation entry; `index` is the 1-based tag used in the context block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub index: usize,
    pub source: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextWithSources {
    pub context: String,
    pub sources: Vec<SourceRef>,
}

pub struct Retriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    #[inline]
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Embed `query`, search the store and drop results below the threshold
    #[inline]
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Retrieval> {
        let k = top_k.unwrap_or(self.config.top_k);
        debug!("Retrieving up to {} chunks for query: {}", k, query);

        let query_vector = self.embedder.embed(query).await?;
        let results = self.store.search(&query_vector, k).await?;
        let found = results.len();

        let kept = filter_by_threshold(results, self.config.similarity_threshold);
        info!(
            "Retrieved {} of {} chunks at threshold {}",
            kept.len(),
            found,
            self.config.similarity_threshold
        );

        if kept.is_empty() {
            Ok(Retrieval::Empty)
        } else {
            Ok(Retrieval::Found(kept))
        }
    }

    /// Context block for prompt injection; empty when nothing relevant was found
    #[inline]
    pub async fn get_context(&self, query: &str, top_k: Option<usize>) -> Result<String> {
        Ok(self.get_context_with_sources(query, top_k).await?.context)
    }

    #[inline]
    pub async fn get_context_with_sources(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<ContextWithSources> {
        let retrieval = self.retrieve(query, top_k).await?;
        Ok(assemble_context(retrieval.results()))
    }
}

/// Keep exactly the results whose score reaches `threshold`
#[inline]
pub fn filter_by_threshold(results: Vec<SearchResult>, threshold: f32) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|result| result.score >= threshold)
        .collect()
}

/// `[Source i: name]` blocks in result order, numbered from 1
#[inline]
pub fn format_context(results: &[SearchResult]) -> String {
    assemble_context(results).context
}

fn assemble_context(results: &[SearchResult]) -> ContextWithSources {
    let mut blocks = Vec::with_capacity(results.len());
    let mut sources = Vec::with_capacity(results.len());

    for (position, result) in results.iter().enumerate() {
        let index = position + 1;
        blocks.push(format!(
            "[Source {}: {}]\n{}",
            index, result.metadata.source, result.content
        ));
        sources.push(SourceRef {
            index,
            source: result.metadata.source.clone(),
            score: result.score,
        });
    }

    ContextWithSources {
        context: blocks.join(CONTEXT_SEPARATOR),
        sources,
    }
}
