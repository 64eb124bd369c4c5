use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    fragment_id::FragmentId,
    vector_db::{FragmentMetadata, QueryMatch, UpsertEntry, VectorDb},
};

/// Outcome of one store write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Fragments handed in by the caller.
    pub submitted: usize,
    /// Distinct identifiers written (duplicates within a batch collapse).
    pub written: usize,
    /// Stale fragments of the candidate that were deleted.
    pub removed: usize,
}

/// Content-addressed fragment store over a [`VectorDb`].
///
/// Every fragment is keyed by [`FragmentId`], so repeated ingestion of the
/// same `(candidate, text)` pairs overwrites entries in place instead of
/// duplicating them. Embedding happens here, once per distinct fragment.
pub struct FragmentStore<E> {
    db: VectorDb,
    embedder: E,
}

impl<E: Embedder> FragmentStore<E> {
    pub fn new(db: VectorDb, embedder: E) -> Self {
        Self { db, embedder }
    }

    /// Read-only access to the underlying collection.
    pub fn db(&self) -> &VectorDb {
        &self.db
    }

    /// Embed and store a candidate's fragments.
    ///
    /// Safe to repeat: an unchanged input leaves the collection unchanged.
    pub fn upsert(
        &mut self,
        candidate: &str,
        fragments: &[String],
        chunk_file: Option<&str>,
    ) -> Result<UpsertSummary> {
        let entries = self.prepare(candidate, fragments, chunk_file)?;
        self.db.upsert(&entries)?;
        Ok(UpsertSummary {
            submitted: fragments.len(),
            written: entries.len(),
            removed: 0,
        })
    }

    /// Like [`upsert`](Self::upsert), but also deletes any fragment of the
    /// candidate that is not part of `fragments`, so a revised document
    /// fully supersedes the previous one.
    pub fn replace_candidate(
        &mut self,
        candidate: &str,
        fragments: &[String],
        chunk_file: Option<&str>,
    ) -> Result<UpsertSummary> {
        let entries = self.prepare(candidate, fragments, chunk_file)?;
        let removed = self.db.replace_candidate(candidate, &entries)?;
        Ok(UpsertSummary {
            submitted: fragments.len(),
            written: entries.len(),
            removed,
        })
    }

    /// Nearest fragments to `vector`, optionally restricted to a candidate.
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        candidate: Option<&str>,
    ) -> Result<Vec<QueryMatch>> {
        self.db.query(vector, top_k, candidate)
    }

    pub fn count(&self) -> Result<usize> {
        self.db.count()
    }

    /// Embed a query text with the same provider used for fragments.
    pub fn embed_query(&mut self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text)
    }

    /// Deduplicate by identifier, embed the distinct texts in one batch and
    /// build upsert rows in identifier order.
    fn prepare(
        &mut self,
        candidate: &str,
        fragments: &[String],
        chunk_file: Option<&str>,
    ) -> Result<Vec<UpsertEntry>> {
        let unique: BTreeMap<FragmentId, &String> = fragments
            .iter()
            .map(|text| (FragmentId::new(candidate, text), text))
            .collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = unique.values().map(|t| t.to_string()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;
        if vectors.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "{} returned {} vectors for {} fragments",
                self.embedder.name(),
                vectors.len(),
                texts.len()
            )));
        }
        let dimension = vectors[0].len();
        if dimension == 0 || vectors.iter().any(|v| v.len() != dimension) {
            return Err(Error::Embedding(format!(
                "{} returned vectors of inconsistent dimension",
                self.embedder.name()
            )));
        }

        debug!(
            candidate,
            fragments = fragments.len(),
            unique = texts.len(),
            "embedded fragments"
        );

        Ok(unique
            .into_iter()
            .zip(vectors)
            .map(|((id, text), vector)| UpsertEntry {
                id: id.hex,
                vector,
                document: text.clone(),
                metadata: FragmentMetadata {
                    candidate: candidate.to_string(),
                    chunk_file: chunk_file.map(str::to_string),
                },
            })
            .collect())
    }
}
