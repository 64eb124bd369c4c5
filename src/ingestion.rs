use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    chunking::{ChunkFile, ChunkingConfig, chunk_text},
    data_dir::DataDir,
    embedding::Embedder,
    error::Result,
    fragment_store::{FragmentStore, UpsertSummary},
    text_util,
    vector_db::VectorDb,
};

/// Outcome of ingesting one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedCandidate {
    pub candidate: String,
    pub chunk_file: PathBuf,
    pub fragments: usize,
    pub summary: UpsertSummary,
}

/// Normalize a candidate's text, fragment it and write its chunk file.
pub fn fragment_candidate(
    data_dir: &DataDir,
    candidate: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<(PathBuf, ChunkFile)> {
    let normalized = text_util::normalize(text);
    let chunks = chunk_text(&normalized, config.chunk_size, config.overlap)?;
    let file = ChunkFile::new(candidate, config, &chunks);

    let path = data_dir.chunk_file(candidate)?;
    file.write(&path)?;
    debug!(candidate, fragments = chunks.len(), path = %path.display(), "wrote chunk file");
    Ok((path, file))
}

/// The candidate's previous fragments are replaced, so the store always
/// reflects the latest text.
fn store_fragments<E: Embedder>(
    store: &mut FragmentStore<E>,
    path: &Path,
    file: &ChunkFile,
) -> Result<UpsertSummary> {
    let chunk_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string());
    store.replace_candidate(&file.candidate, &file.texts(), chunk_name.as_deref())
}

/// Drop everything derived from a candidate's text: its stored fragments,
/// when a store exists, and its chunk file.
///
/// Returns the number of fragments removed.
pub fn retract_candidate(
    db: Option<&VectorDb>,
    data_dir: &DataDir,
    candidate: &str,
) -> Result<usize> {
    let removed = match db {
        Some(db) => db.remove_candidate(candidate)?,
        None => 0,
    };
    let chunk_file = data_dir.chunk_file(candidate)?;
    if chunk_file.is_file() {
        std::fs::remove_file(&chunk_file)?;
    }
    debug!(candidate, removed, "retracted candidate");
    Ok(removed)
}

/// Fragment and store one candidate in a single step.
pub fn ingest_candidate<E: Embedder>(
    store: &mut FragmentStore<E>,
    data_dir: &DataDir,
    candidate: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<IngestedCandidate> {
    let (chunk_file, file) = fragment_candidate(data_dir, candidate, text, config)?;
    let summary = store_fragments(store, &chunk_file, &file)?;
    Ok(IngestedCandidate {
        candidate: candidate.to_string(),
        chunk_file,
        fragments: file.fragments.len(),
        summary,
    })
}
