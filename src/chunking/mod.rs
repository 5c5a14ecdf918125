#[cfg(test)]
mod tests;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::LoadedDocument;

/// A chunk of document text ready for embedding. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    /// The chunk text.
    pub content: String,
    /// Filename the chunk originated from.
    pub source: String,
    /// Position of this chunk within its source document.
    pub chunk_index: u32,
}

/// Configuration for the recursive character splitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Characters of overlap carried between adjacent chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 300,
        }
    }
}

/// Boundary preference, strongest first: paragraph, line, sentence, word.
/// Text with none of these gets hard character cuts.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Split a decoded document into overlapping chunks.
#[inline]
pub fn chunk_document(
    document: &LoadedDocument,
    config: &ChunkingConfig,
) -> Vec<DocumentChunk> {
    let pieces = split_text(&document.text, config);

    let chunks: Vec<DocumentChunk> = pieces
        .into_iter()
        .enumerate()
        .map(|(i, content)| DocumentChunk {
            content,
            source: document.source.clone(),
            chunk_index: i as u32,
        })
        .collect();

    debug!(
        "Split document '{}' ({} chars) into {} chunks",
        document.source,
        document.text.chars().count(),
        chunks.len()
    );

    chunks
}

/// Split raw text into overlapping pieces, preferring semantic boundaries
/// over hard cuts. Each returned piece is at most `chunk_size` characters.
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
        .into_iter()
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn split_recursive(text: &str, separators: &[&str], config: &ChunkingConfig) -> Vec<String> {
    let Some(position) = separators.iter().position(|sep| text.contains(sep)) else {
        return hard_cut(text, config);
    };
    let separator = separators[position];
    let remaining = &separators[position + 1..];

    let mut chunks = Vec::new();
    let mut mergeable: Vec<String> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(&piece) <= config.chunk_size {
            mergeable.push(piece);
            continue;
        }

        // Oversized piece: flush what we have, then descend to a weaker boundary.
        if !mergeable.is_empty() {
            chunks.extend(merge_pieces(&mergeable, config));
            mergeable.clear();
        }

        if remaining.is_empty() {
            chunks.extend(hard_cut(&piece, config));
        } else {
            chunks.extend(split_recursive(&piece, remaining, config));
        }
    }

    if !mergeable.is_empty() {
        chunks.extend(merge_pieces(&mergeable, config));
    }

    chunks
}

/// Greedily pack boundary-sized pieces into chunks, carrying a tail of at
/// most `chunk_overlap` characters into the next chunk.
fn merge_pieces(pieces: &[String], config: &ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(usize, &str)> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);

        if total + len > config.chunk_size && !window.is_empty() {
            chunks.push(window.iter().map(|(_, text)| *text).collect::<String>());

            // Shrink the window down to the overlap limit, and further if the
            // incoming piece still would not fit.
            while total > config.chunk_overlap
                || (total + len > config.chunk_size && total > 0)
            {
                let Some((front_len, _)) = window.pop_front() else {
                    break;
                };
                total -= front_len;
            }
        }

        window.push_back((len, piece.as_str()));
        total += len;
    }

    if !window.is_empty() {
        chunks.push(window.iter().map(|(_, text)| *text).collect::<String>());
    }

    chunks
}

/// Last resort: fixed-width character windows with overlap.
fn hard_cut(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= config.chunk_size {
        return vec![text.to_string()];
    }

    let step = config
        .chunk_size
        .saturating_sub(config.chunk_overlap)
        .max(1);
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    pieces
}

/// Split on `separator`, keeping the separator attached to the preceding
/// piece so that concatenating pieces reconstructs the input.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;

    while let Some(found) = rest.find(separator) {
        let (head, tail) = rest.split_at(found + separator.len());
        pieces.push(head.to_string());
        rest = tail;
    }

    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }

    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
