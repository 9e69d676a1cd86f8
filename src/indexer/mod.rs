// Indexer module
// Batch ingestion: load, chunk, embed and upsert the corpus


use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::{DeleteTarget, EmbeddingRecord, VectorStore};
use crate::embeddings::chunking::TextChunker;
use crate::embeddings::{Embedder, embed_all};
use crate::loader::{DocumentLoader, LoadReport};
use crate::{RagError, Result};

const DEFAULT_BATCH_SIZE: usize = 50;

/// Counts reached by one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files_loaded: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub units_loaded: usize,
    pub chunks_created: usize,
    pub chunks_indexed: usize,
    /// Failure that stopped the run early, if any
    pub error: Option<String>,
}

impl IngestReport {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.chunks_indexed == self.chunks_created
    }
}

pub struct IngestionPipeline {
    loader: DocumentLoader,
    chunker: TextChunker,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    embed_concurrency: usize,
    batch_size: usize,
    show_progress: bool,
}

impl IngestionPipeline {
    #[inline]
    pub fn new(
        loader: DocumentLoader,
        chunker: TextChunker,
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            loader,
            chunker,
            store,
            embedder,
            embed_concurrency: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }

    /// Pipeline over the configured corpus directory and chunking settings
    #[inline]
    pub fn from_config(
        config: &Config,
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let chunker = TextChunker::new(config.chunking.clone())?;
        Ok(
            Self::new(DocumentLoader::new(config.documents_path()), chunker, store, embedder)
                .with_embed_concurrency(config.ollama.embed_concurrency)
                .with_batch_size(config.storage.write_batch_size),
        )
    }

    #[inline]
    pub fn with_embed_concurrency(mut self, concurrency: usize) -> Self {
        self.embed_concurrency = concurrency.max(1);
        self
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Show a progress bar on an attended terminal
    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress && console::user_attended_stderr();
        self
    }

    /// Run one ingestion pass
    ///
    /// With `reset` the collection is dropped first. Unreadable files are
    /// counted, not fatal. The first batch that fails to embed or write stops
    /// the run; earlier batches stay indexed and the report carries the error.
    #[inline]
    pub async fn run(&self, reset: bool) -> Result<IngestReport> {
        if reset {
            info!("Resetting collection {}", self.store.collection_name());
            self.store.delete(DeleteTarget::All).await?;
        }

        let loader = self.loader.clone();
        let load_report: LoadReport = tokio::task::spawn_blocking(move || loader.load_directory())
            .await
            .map_err(|e| RagError::Other(anyhow::anyhow!("Document loading task failed: {}", e)))?;

        let chunks = self.chunker.split_documents(&load_report.units);
        let mut report = IngestReport {
            files_loaded: load_report.files_loaded,
            files_failed: load_report.files_failed,
            files_skipped: load_report.files_skipped,
            units_loaded: load_report.units.len(),
            chunks_created: chunks.len(),
            ..IngestReport::default()
        };

        if chunks.is_empty() {
            warn!(
                "No chunks produced from {}",
                self.loader.documents_dir().display()
            );
            return Ok(report);
        }

        info!(
            "Indexing {} chunks from {} files with {}",
            chunks.len(),
            report.files_loaded,
            self.embedder.model_name()
        );

        let bar = self.progress_bar(chunks.len());

        for (batch_index, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();

            let embedded = embed_all(self.embedder.as_ref(), &texts, self.embed_concurrency).await;
            let vectors = match embedded {
                Ok(vectors) => vectors,
                Err(e) => {
                    error!("Embedding failed in batch {}: {}", batch_index, e);
                    report.error = Some(format!("Batch {} failed: {}", batch_index, e));
                    break;
                }
            };

            let records: Vec<EmbeddingRecord> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector))
                .collect();

            match self.store.upsert(records).await {
                Ok(written) => {
                    report.chunks_indexed += written;
                    bar.inc(batch.len() as u64);
                    debug!("Indexed batch {} ({} chunks)", batch_index, written);
                }
                Err(e) => {
                    error!("Index write failed in batch {}: {}", batch_index, e);
                    report.error = Some(format!("Batch {} failed: {}", batch_index, e));
                    break;
                }
            }
        }

        bar.finish_and_clear();

        info!(
            "Ingestion finished: {} files loaded, {} failed, {} skipped, {}/{} chunks indexed",
            report.files_loaded,
            report.files_failed,
            report.files_skipped,
            report.chunks_indexed,
            report.chunks_created
        );
        Ok(report)
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(total as u64);
        let template = "{bar:40} [{pos}/{len}] Embedding chunks {msg}";
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style);
        }
        bar
    }
}
