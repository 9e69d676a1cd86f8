#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::{DocumentMetadata, DocumentUnit};
use crate::{RagError, Result};

/// Separators tried in order, largest structural unit first.
/// Text that still does not fit after the last one is cut into character windows.
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

/// Represents a chunk of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// The chunk text, an exact slice of the parent unit
    pub content: String,
    /// Provenance inherited from the parent unit
    pub metadata: DocumentMetadata,
    /// Position of this chunk within its source's chunk sequence
    pub chunk_index: usize,
    /// Byte offset of the chunk within the parent unit's text
    pub start: usize,
}

impl ContentChunk {
    /// Stable record identity derived from source and position
    #[inline]
    pub fn identity(&self) -> String {
        chunk_identity(&self.metadata.source, self.chunk_index)
    }
}

#[inline]
pub fn chunk_identity(source: &str, chunk_index: usize) -> String {
    format!("{}_{}", source, chunk_index)
}

/// Configuration for content chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks (upper bound)
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be positive".to_string()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split document units into chunks, propagating metadata
    ///
    /// Chunk indices count per source, so several units of one file continue
    /// a single sequence.
    #[inline]
    pub fn split_documents(&self, units: &[DocumentUnit]) -> Vec<ContentChunk> {
        let mut chunks = Vec::new();
        let mut next_index: HashMap<&str, usize> = HashMap::new();

        for unit in units {
            let counter = next_index.entry(unit.metadata.source.as_str()).or_insert(0);
            for span in self.split_spans(&unit.text) {
                chunks.push(ContentChunk {
                    content: slice(&unit.text, span.clone()).to_string(),
                    metadata: unit.metadata.clone(),
                    chunk_index: *counter,
                    start: span.start,
                });
                *counter += 1;
            }
        }

        debug!(
            "Split {} document unit(s) into {} chunk(s)",
            units.len(),
            chunks.len()
        );
        chunks
    }

    /// Split raw text carrying the given metadata
    #[inline]
    pub fn split_text(&self, text: &str, metadata: DocumentMetadata) -> Vec<ContentChunk> {
        self.split_documents(&[DocumentUnit {
            text: text.to_string(),
            metadata,
        }])
    }

    /// Byte ranges of the chunks of `text`, in order
    ///
    /// Windows holding only whitespace are dropped, so runs of blank lines
    /// may fall between two consecutive spans.
    #[inline]
    pub fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        split_recursive(text, 0, &SEPARATORS, self.config.chunk_size, &mut pieces);
        merge_pieces(&pieces, self.config.chunk_size, self.config.chunk_overlap)
            .into_iter()
            .filter(|span| !slice(text, span.clone()).trim().is_empty())
            .collect()
    }
}

#[expect(
    clippy::string_slice,
    reason = "spans always come from match_indices or char_indices boundaries"
)]
fn slice(text: &str, span: Range<usize>) -> &str {
    &text[span]
}

/// Break `segment` into pieces of at most `size` characters using the first
/// separator it contains, recursing with the finer separators on oversized pieces.
/// Separators stay attached to the end of the preceding piece.
fn split_recursive(
    segment: &str,
    offset: usize,
    separators: &[&str],
    size: usize,
    out: &mut Vec<Piece>,
) {
    if segment.is_empty() {
        return;
    }

    let chars = segment.chars().count();
    if chars <= size {
        out.push(Piece {
            start: offset,
            end: offset + segment.len(),
            chars,
        });
        return;
    }

    let Some(position) = separators.iter().position(|sep| segment.contains(sep)) else {
        split_by_chars(segment, offset, size, out);
        return;
    };
    let separator = separators[position];
    let finer = &separators[position + 1..];

    let mut piece_start = 0;
    for (idx, matched) in segment.match_indices(separator) {
        let piece_end = idx + matched.len();
        split_recursive(
            slice(segment, piece_start..piece_end),
            offset + piece_start,
            finer,
            size,
            out,
        );
        piece_start = piece_end;
    }
    split_recursive(
        slice(segment, piece_start..segment.len()),
        offset + piece_start,
        finer,
        size,
        out,
    );
}

/// Last resort: fixed windows of `size` characters
fn split_by_chars(segment: &str, offset: usize, size: usize, out: &mut Vec<Piece>) {
    let mut piece_start = 0;
    let mut count = 0;

    for (idx, _) in segment.char_indices() {
        if count == size {
            out.push(Piece {
                start: offset + piece_start,
                end: offset + idx,
                chars: count,
            });
            piece_start = idx;
            count = 0;
        }
        count += 1;
    }

    if count > 0 {
        out.push(Piece {
            start: offset + piece_start,
            end: offset + segment.len(),
            chars: count,
        });
    }
}

/// Greedily pack contiguous pieces into windows of at most `size` characters.
/// Each new window starts with the trailing pieces of the previous one, as many
/// as fit in `overlap` characters while leaving room for the next piece.
fn merge_pieces(pieces: &[Piece], size: usize, overlap: usize) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut window: VecDeque<Piece> = VecDeque::new();
    let mut total = 0;

    for &piece in pieces {
        if total + piece.chars > size {
            if let (Some(first), Some(last)) = (window.front(), window.back()) {
                spans.push(first.start..last.end);
            }

            while total > overlap || (total > 0 && total + piece.chars > size) {
                match window.pop_front() {
                    Some(removed) => total -= removed.chars,
                    None => break,
                }
            }
        }

        window.push_back(piece);
        total += piece.chars;
    }

    if let (Some(first), Some(last)) = (window.front(), window.back()) {
        spans.push(first.start..last.end);
    }

    spans
}
