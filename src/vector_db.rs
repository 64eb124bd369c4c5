use std::{collections::BTreeSet, path::Path};

use rayon::prelude::*;
use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
    TableError,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the fragment collection inside the vector store.
pub const COLLECTION_NAME: &str = "resume_fragments";

const VECTORS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("resume_fragments");
const DOCUMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("resume_fragments.documents");
/// `(candidate, fragment id)` index, so filtered reads never scan the
/// whole collection.
const BY_CANDIDATE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("resume_fragments.by_candidate");

/// Header size: 4 bytes vector dimension.
const HEADER_SIZE: usize = 4;

/// Metadata stored next to every fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentMetadata {
    /// Owning candidate id; the field query filters match on.
    pub candidate: String,
    /// Fragment file the text was read from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_file: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    document: String,
    metadata: FragmentMetadata,
}

/// One row of an upsert batch.
#[derive(Debug, Clone)]
pub struct UpsertEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub document: String,
    pub metadata: FragmentMetadata,
}

/// A query hit, ordered by ascending distance.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub document: String,
    pub metadata: FragmentMetadata,
    /// Squared Euclidean distance to the query vector.
    pub distance: f32,
}

/// Persistent fragment collection backed by redb.
///
/// Two tables share the fragment id as key: one holds the embedding
/// vectors, the other the fragment text and metadata as JSON.
///
/// A third table indexes fragment ids by owning candidate.
///
/// Binary format per vector entry:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 values (native endian, via `bytemuck`)
pub struct VectorDb {
    db: Database,
}

impl VectorDb {
    /// Open or create the store and its collection for writing.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use cvscreen::VectorDb;
    ///
    /// let db = VectorDb::create(&tmp.path().join("vectors.redb")).unwrap();
    /// assert_eq!(db.count().unwrap(), 0);
    /// ```
    pub fn create(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(BY_CANDIDATE)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Open an existing store for querying.
    ///
    /// A missing store file or collection is an error, unlike an empty
    /// collection, which is valid and simply yields no matches.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound {
                kind: "vector store",
                name: path.display().to_string(),
            });
        }

        let db = Database::open(path)?;
        {
            let txn = db.begin_read()?;
            open_collection(txn.open_table(VECTORS))?;
            open_collection(txn.open_table(DOCUMENTS))?;
            open_collection(txn.open_table(BY_CANDIDATE))?;
        }

        Ok(Self { db })
    }

    /// Insert or overwrite entries in a single transaction.
    pub fn upsert(&self, entries: &[UpsertEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let rows = encode_entries(entries)?;
        let txn = self.db.begin_write()?;
        {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut index = txn.open_table(BY_CANDIDATE)?;
            for row in &rows {
                write_row(&mut vectors, &mut documents, &mut index, row)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Upsert `entries` and delete every other fragment owned by
    /// `candidate`, atomically.
    ///
    /// Returns the number of stale fragments removed.
    pub fn replace_candidate(
        &self,
        candidate: &str,
        entries: &[UpsertEntry],
    ) -> Result<usize> {
        let keep: BTreeSet<&str> =
            entries.iter().map(|e| e.id.as_str()).collect();
        let rows = encode_entries(entries)?;

        let txn = self.db.begin_write()?;
        let removed = {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut index = txn.open_table(BY_CANDIDATE)?;

            let stale: Vec<String> = ids_in(&index, candidate)?
                .into_iter()
                .filter(|id| !keep.contains(id.as_str()))
                .collect();
            for id in &stale {
                vectors.remove(id.as_str())?;
                documents.remove(id.as_str())?;
                index.remove((candidate, id.as_str()))?;
            }
            for row in &rows {
                write_row(&mut vectors, &mut documents, &mut index, row)?;
            }
            stale.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Delete every fragment owned by a candidate.
    pub fn remove_candidate(&self, candidate: &str) -> Result<usize> {
        self.replace_candidate(candidate, &[])
    }

    /// Number of fragments in the collection.
    pub fn count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Fragment ids owned by a candidate, sorted.
    pub fn ids_for_candidate(&self, candidate: &str) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        ids_in(&txn.open_table(BY_CANDIDATE)?, candidate)
    }

    /// Distinct candidate ids present in the collection.
    pub fn candidates(&self) -> Result<BTreeSet<String>> {
        let txn = self.db.begin_read()?;
        let index = txn.open_table(BY_CANDIDATE)?;
        let mut result = BTreeSet::new();
        for entry in index.iter()? {
            let (key, _) = entry?;
            let (candidate, _) = key.value();
            result.insert(candidate.to_string());
        }
        Ok(result)
    }

    /// Return up to `top_k` fragments closest to `vector`.
    ///
    /// Results are ordered by ascending distance, ties broken by id. With a
    /// candidate filter only that candidate's fragments are eligible. All
    /// reads come from one snapshot.
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        candidate: Option<&str>,
    ) -> Result<Vec<QueryMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let documents = txn.open_table(DOCUMENTS)?;
        let ids = match candidate {
            Some(candidate) => ids_in(&txn.open_table(BY_CANDIDATE)?, candidate)?,
            None => {
                let mut ids = Vec::new();
                for entry in vectors.iter()? {
                    let (key, _) = entry?;
                    ids.push(key.value().to_string());
                }
                ids
            }
        };

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let (Some(stored), Some(doc)) =
                (vectors.get(id.as_str())?, documents.get(id.as_str())?)
            else {
                continue;
            };
            let stored = decode_vector(stored.value()).ok_or_else(|| {
                Error::Embedding(format!("corrupt vector entry for {id}"))
            })?;
            if stored.len() != vector.len() {
                return Err(Error::Embedding(format!(
                    "query dimension {} does not match stored dimension {} (fragment {id})",
                    vector.len(),
                    stored.len()
                )));
            }
            let doc: StoredDocument = serde_json::from_slice(doc.value())?;
            rows.push((id, doc, stored));
        }

        let mut matches: Vec<QueryMatch> = rows
            .into_par_iter()
            .map(|(id, doc, stored)| QueryMatch {
                distance: squared_l2(vector, &stored),
                id,
                document: doc.document,
                metadata: doc.metadata,
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}

impl std::fmt::Debug for VectorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorDb").finish_non_exhaustive()
    }
}

fn open_collection<T>(opened: std::result::Result<T, TableError>) -> Result<T> {
    opened.map_err(|e| match e {
        TableError::TableDoesNotExist(_) => Error::NotFound {
            kind: "collection",
            name: COLLECTION_NAME.to_string(),
        },
        other => other.into(),
    })
}

type Row<'a> = (&'a str, &'a str, Vec<u8>, Vec<u8>);

/// Fragment ids owned by `candidate`, read from the index in id order.
fn ids_in<T>(index: &T, candidate: &str) -> Result<Vec<String>>
where
    T: ReadableTable<(&'static str, &'static str), ()>,
{
    let mut ids = Vec::new();
    for entry in index.range((candidate, "")..)? {
        let (key, _) = entry?;
        let (owner, id) = key.value();
        if owner != candidate {
            break;
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// Write one encoded row and keep the candidate index in step with it.
fn write_row(
    vectors: &mut redb::Table<'_, &'static str, &'static [u8]>,
    documents: &mut redb::Table<'_, &'static str, &'static [u8]>,
    index: &mut redb::Table<'_, (&'static str, &'static str), ()>,
    (id, candidate, vector, document): &Row<'_>,
) -> Result<()> {
    vectors.insert(*id, vector.as_slice())?;
    let previous = documents
        .insert(*id, document.as_slice())?
        .map(|old| serde_json::from_slice::<StoredDocument>(old.value()))
        .transpose()?;
    if let Some(old) = previous
        && old.metadata.candidate != *candidate
    {
        index.remove((old.metadata.candidate.as_str(), *id))?;
    }
    index.insert((*candidate, *id), ())?;
    Ok(())
}

/// Serialize entries into `(id, candidate, vector bytes, document json)`
/// rows.
fn encode_entries(entries: &[UpsertEntry]) -> Result<Vec<Row<'_>>> {
    entries
        .iter()
        .map(|entry| -> Result<Row<'_>> {
            let stored = StoredDocument {
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
            };
            Ok((
                entry.id.as_str(),
                entry.metadata.candidate.as_str(),
                encode_vector(&entry.vector),
                serde_json::to_vec(&stored)?,
            ))
        })
        .collect()
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(vector));
    bytes.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(vector));
    bytes
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension * std::mem::size_of::<f32>() {
        return None;
    }
    Some(bytemuck::pod_collect_to_vec::<u8, f32>(body))
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, VectorDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = VectorDb::create(&tmp.path().join("vectors.redb")).unwrap();
        (tmp, db)
    }

    fn entry(id: &str, candidate: &str, vector: &[f32]) -> UpsertEntry {
        UpsertEntry {
            id: id.to_string(),
            vector: vector.to_vec(),
            document: format!("text of {id}"),
            metadata: FragmentMetadata {
                candidate: candidate.to_string(),
                chunk_file: None,
            },
        }
    }

    #[test]
    fn vector_encoding_roundtrip() {
        let v = vec![0.5, -1.25, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)).unwrap(), v);
        assert!(decode_vector(&[1, 0]).is_none());
        assert!(decode_vector(&[2, 0, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn decode_tolerates_unaligned_input() {
        let v = vec![1.5f32, -2.0];
        let mut padded = vec![0u8];
        padded.extend_from_slice(&encode_vector(&v));
        assert_eq!(decode_vector(&padded[1..]).unwrap(), v);
    }

    #[test]
    fn upsert_same_ids_is_idempotent() {
        let (_tmp, db) = test_db();
        let batch = vec![entry("a", "alice", &[1.0, 0.0]), entry("b", "alice", &[0.0, 1.0])];

        db.upsert(&batch).unwrap();
        db.upsert(&batch).unwrap();

        assert_eq!(db.count().unwrap(), 2);
    }

    #[test]
    fn query_orders_by_distance_then_id() {
        let (_tmp, db) = test_db();
        db.upsert(&[
            entry("c", "alice", &[0.0, 1.0]),
            entry("b", "bob", &[1.0, 0.0]),
            entry("a", "alice", &[1.0, 0.0]),
        ])
        .unwrap();

        let hits = db.query(&[1.0, 0.0], 10, None).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(hits[0].distance, 0.0);
        assert!((hits[2].distance - 2.0).abs() < 1e-6);
        assert_eq!(hits[0].document, "text of a");
    }

    #[test]
    fn query_respects_top_k_and_filter() {
        let (_tmp, db) = test_db();
        db.upsert(&[
            entry("a", "alice", &[1.0, 0.0]),
            entry("b", "bob", &[1.0, 0.0]),
            entry("c", "alice", &[0.0, 1.0]),
        ])
        .unwrap();

        let hits = db.query(&[1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);

        let hits = db.query(&[1.0, 0.0], 10, Some("alice")).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.metadata.candidate == "alice"));

        assert!(db.query(&[1.0, 0.0], 10, Some("carol")).unwrap().is_empty());
    }

    #[test]
    fn query_dimension_mismatch_is_an_error() {
        let (_tmp, db) = test_db();
        db.upsert(&[entry("a", "alice", &[1.0, 0.0])]).unwrap();
        assert!(matches!(
            db.query(&[1.0, 0.0, 0.0], 5, None),
            Err(Error::Embedding(_))
        ));
    }

    #[test]
    fn replace_candidate_prunes_stale_fragments() {
        let (_tmp, db) = test_db();
        db.upsert(&[
            entry("old", "alice", &[1.0, 0.0]),
            entry("keep", "alice", &[0.0, 1.0]),
            entry("other", "bob", &[1.0, 1.0]),
        ])
        .unwrap();

        let removed = db
            .replace_candidate(
                "alice",
                &[entry("keep", "alice", &[0.0, 1.0]), entry("new", "alice", &[0.5, 0.5])],
            )
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(db.ids_for_candidate("alice").unwrap(), vec!["keep", "new"]);
        assert_eq!(db.ids_for_candidate("bob").unwrap(), vec!["other"]);
    }

    #[test]
    fn remove_candidate_and_candidates() {
        let (_tmp, db) = test_db();
        db.upsert(&[entry("a", "alice", &[1.0]), entry("b", "bob", &[1.0])]).unwrap();

        let names: Vec<_> = db.candidates().unwrap().into_iter().collect();
        assert_eq!(names, vec!["alice", "bob"]);

        assert_eq!(db.remove_candidate("alice").unwrap(), 1);
        assert_eq!(db.count().unwrap(), 1);
        let names: Vec<_> = db.candidates().unwrap().into_iter().collect();
        assert_eq!(names, vec!["bob"]);
        assert!(db.query(&[1.0], 10, Some("alice")).unwrap().is_empty());
    }

    #[test]
    fn candidate_filter_does_not_match_prefixes() {
        let (_tmp, db) = test_db();
        db.upsert(&[
            entry("x", "al", &[1.0, 0.0]),
            entry("y", "alice", &[1.0, 0.0]),
            entry("z", "alicia", &[1.0, 0.0]),
        ])
        .unwrap();

        assert_eq!(db.ids_for_candidate("al").unwrap(), vec!["x"]);
        assert_eq!(db.ids_for_candidate("alice").unwrap(), vec!["y"]);
        let hits = db.query(&[1.0, 0.0], 10, Some("alicia")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "z");
    }

    #[test]
    fn reassigned_id_moves_between_candidates() {
        let (_tmp, db) = test_db();
        db.upsert(&[entry("a", "alice", &[1.0])]).unwrap();
        db.upsert(&[entry("a", "bob", &[1.0])]).unwrap();

        assert!(db.ids_for_candidate("alice").unwrap().is_empty());
        assert_eq!(db.ids_for_candidate("bob").unwrap(), vec!["a"]);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn open_missing_store_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = VectorDb::open(&tmp.path().join("absent.redb")).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "vector store", .. }));
    }

    #[test]
    fn open_store_without_collection_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bare.redb");
        drop(Database::create(&path).unwrap());

        let err = VectorDb::open(&path).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "collection", .. }));
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.redb");

        {
            let db = VectorDb::create(&path).unwrap();
            db.upsert(&[entry("a", "alice", &[1.0, 2.0])]).unwrap();
        }

        {
            let db = VectorDb::open(&path).unwrap();
            assert_eq!(db.count().unwrap(), 1);
            let hits = db.query(&[1.0, 2.0], 1, Some("alice")).unwrap();
            assert_eq!(hits[0].distance, 0.0);
        }
    }
}
