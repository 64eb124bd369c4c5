//! Splitting normalized document text into overlapping fragments.
//!
//! Fragments are character windows (not bytes, not tokens) so that
//! multi-byte text never splits inside a code point. Each window after the
//! first starts `overlap` characters before the end of its predecessor, and
//! the sequence stops as soon as a window reaches the end of the text.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default fragment size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default overlap between consecutive fragments in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 120;

/// Fragmentation parameters.
///
/// # Examples
///
/// ```
/// use cvscreen::chunking::ChunkingConfig;
///
/// assert!(ChunkingConfig::new(800, 120).is_ok());
/// assert!(ChunkingConfig::new(100, 100).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum fragment size in characters.
    pub chunk_size: usize,
    /// Characters shared by adjacent fragments.
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size <= overlap {
            return Err(Error::InvalidFragmentParams {
                size: chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A fragment of a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The fragment text.
    pub text: String,
    /// Zero-based fragment index within the document.
    pub index: usize,
    /// Character offset where this fragment starts in the document.
    pub start_char: usize,
}

/// Split text into overlapping character windows.
///
/// Window `i` covers `[start, start + chunk_size)`; the next window starts at
/// `end - overlap`. The final fragment may be shorter than `chunk_size`.
/// Empty text yields no fragments.
///
/// # Examples
///
/// ```
/// use cvscreen::chunking::chunk_text;
///
/// let chunks = chunk_text("abcdefghij", 4, 1).unwrap();
/// let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
/// assert_eq!(texts, ["abcd", "defg", "ghij"]);
///
/// assert!(chunk_text("", 4, 1).unwrap().is_empty());
/// ```
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;

    // char index -> byte index, with a sentinel for the end of the text
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    let mut chunks = Vec::new();
    let mut start_char = 0;

    while start_char < char_count {
        let end_char = (start_char + config.chunk_size).min(char_count);
        chunks.push(Chunk {
            text: text[char_to_byte[start_char]..char_to_byte[end_char]]
                .to_string(),
            index: chunks.len(),
            start_char,
        });

        if end_char == char_count {
            break;
        }
        start_char = end_char - config.overlap;
    }

    Ok(chunks)
}

/// One numbered fragment inside a [`ChunkFile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    /// One-based fragment number.
    pub index: usize,
    pub text: String,
}

/// Structured per-candidate fragment file written between fragmentation and
/// store population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFile {
    pub candidate: String,
    pub fragment_size: usize,
    pub fragment_overlap: usize,
    pub fragments: Vec<ChunkEntry>,
}

impl ChunkFile {
    pub fn new(
        candidate: &str,
        config: ChunkingConfig,
        chunks: &[Chunk],
    ) -> Self {
        Self {
            candidate: candidate.to_string(),
            fragment_size: config.chunk_size,
            fragment_overlap: config.overlap,
            fragments: chunks
                .iter()
                .map(|c| ChunkEntry {
                    index: c.index + 1,
                    text: c.text.clone(),
                })
                .collect(),
        }
    }

    /// Fragment texts in order.
    pub fn texts(&self) -> Vec<String> {
        self.fragments.iter().map(|f| f.text.clone()).collect()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read and validate a fragment file.
    ///
    /// Fragment numbers must run `1..=n` without gaps.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: ChunkFile = serde_json::from_str(&contents)?;

        for (i, entry) in file.fragments.iter().enumerate() {
            if entry.index != i + 1 {
                return Err(Error::Config(format!(
                    "fragment file {} is out of sequence: expected fragment {}, found {}",
                    path.display(),
                    i + 1,
                    entry.index
                )));
            }
        }

        Ok(file)
    }
}
