use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding request timed out after {0:?}")]
    EmbeddingTimeout(Duration),

    #[error("Embedding failed for item {index}: {source}")]
    BatchEmbedding {
        index: usize,
        #[source]
        source: Box<RagError>,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Index write failed in batch {batch}: {message}")]
    IndexWrite { batch: usize, message: String },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod generation;
pub mod indexer;
pub mod loader;
pub mod retrieval;
