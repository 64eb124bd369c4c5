use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    vector_db::VectorDb,
};

/// Fragments retrieved per candidate before best-of-N selection.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Smallest distances averaged into a candidate's aggregate distance.
pub const DEFAULT_TOP_N: usize = 2;

/// Aggregation parameters.
///
/// Retrieving a pool larger than `top_n` keeps the best-of-N selection
/// stable even when the store caps how many results one query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingParams {
    pub pool_size: usize,
    pub top_n: usize,
}

impl RankingParams {
    pub fn new(pool_size: usize, top_n: usize) -> Result<Self> {
        if top_n == 0 || pool_size <= top_n {
            return Err(Error::Config(format!(
                "ranking needs 1 <= top_n < pool_size (got top_n {top_n}, pool_size {pool_size})"
            )));
        }
        Ok(Self { pool_size, top_n })
    }
}

impl Default for RankingParams {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// One fragment that contributed to a candidate's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub fragment_id: String,
    pub text: String,
    pub distance: f32,
}

/// A scored candidate with its rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    /// One-based position in the ranking.
    pub rank: usize,
    pub candidate: String,
    /// Mean of the selected evidence distances.
    pub aggregate_distance: f64,
    /// `1 / (1 + aggregate_distance)`, in `(0, 1]`.
    pub score: f64,
    /// Best-matching fragments, ascending by distance.
    pub evidence: Vec<Evidence>,
}

/// Map an aggregate distance onto `(0, 1]`, strictly decreasing.
///
/// # Examples
///
/// ```
/// use cvscreen::ranking::score_from_distance;
///
/// assert_eq!(score_from_distance(0.0), 1.0);
/// assert_eq!(score_from_distance(1.0), 0.5);
/// ```
pub fn score_from_distance(aggregate_distance: f64) -> f64 {
    1.0 / (1.0 + aggregate_distance.max(0.0))
}

/// Score one candidate against the job vector.
///
/// Returns `None` when the candidate owns no fragments in the store.
pub fn score_candidate(
    db: &VectorDb,
    job_vector: &[f32],
    candidate: &str,
    params: RankingParams,
) -> Result<Option<RankedCandidate>> {
    let mut pool = db.query(job_vector, params.pool_size, Some(candidate))?;
    if pool.is_empty() {
        return Ok(None);
    }

    // The store already orders by (distance, id); sorting again keeps the
    // selection independent of that guarantee.
    pool.sort_by(|a, b| {
        a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id))
    });
    pool.truncate(params.top_n);

    let aggregate_distance = pool.iter().map(|m| f64::from(m.distance)).sum::<f64>()
        / pool.len() as f64;

    Ok(Some(RankedCandidate {
        rank: 0, // Set after sorting
        candidate: candidate.to_string(),
        aggregate_distance,
        score: score_from_distance(aggregate_distance),
        evidence: pool
            .into_iter()
            .map(|m| Evidence {
                fragment_id: m.id,
                text: m.document,
                distance: m.distance,
            })
            .collect(),
    }))
}

/// Rank candidates by relevance to the job vector.
///
/// Candidates without fragments are left out. The order is descending
/// score with ties broken by candidate id, so it never depends on the
/// order of `candidates`. Ranks run `1..=n` without gaps.
pub fn rank(
    db: &VectorDb,
    job_vector: &[f32],
    candidates: &[String],
    params: RankingParams,
) -> Result<Vec<RankedCandidate>> {
    let scored: Vec<Option<RankedCandidate>> = candidates
        .par_iter()
        .map(|candidate| score_candidate(db, job_vector, candidate, params))
        .collect::<Result<_>>()?;

    let mut ranked = Vec::with_capacity(scored.len());
    for (candidate, record) in candidates.iter().zip(scored) {
        match record {
            Some(record) => ranked.push(record),
            None => warn!(candidate, "no fragments in store, excluded from ranking"),
        }
    }

    if ranked.is_empty() {
        return Err(Error::NoRankingResults);
    }

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.candidate.cmp(&b.candidate))
    });
    for (i, record) in ranked.iter_mut().enumerate() {
        record.rank = i + 1;
    }

    debug!(ranked = ranked.len(), "ranking complete");
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_db::{FragmentMetadata, UpsertEntry};

    fn db_with(rows: &[(&str, &str, [f32; 2])]) -> (tempfile::TempDir, VectorDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = VectorDb::create(&tmp.path().join("vectors.redb")).unwrap();
        let entries: Vec<_> = rows
            .iter()
            .map(|(id, candidate, v)| UpsertEntry {
                id: id.to_string(),
                vector: v.to_vec(),
                document: format!("fragment {id}"),
                metadata: FragmentMetadata {
                    candidate: candidate.to_string(),
                    chunk_file: None,
                },
            })
            .collect();
        db.upsert(&entries).unwrap();
        (tmp, db)
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn params_validation() {
        assert!(RankingParams::new(10, 2).is_ok());
        assert!(RankingParams::new(3, 2).is_ok());
        assert!(RankingParams::new(2, 2).is_err());
        assert!(RankingParams::new(1, 2).is_err());
        assert!(RankingParams::new(10, 0).is_err());
    }

    #[test]
    fn score_is_bounded_and_strictly_decreasing() {
        let distances = [0.0, 0.001, 0.5, 1.0, 2.0, 4.0, 100.0];
        for pair in distances.windows(2) {
            let (a, b) = (score_from_distance(pair[0]), score_from_distance(pair[1]));
            assert!(a > b);
            assert!(b > 0.0 && a <= 1.0);
        }
    }

    #[test]
    fn aggregate_is_mean_of_top_n_smallest() {
        // distances to [0, 0]: a1 = 1, a2 = 4, a3 = 0.25, a4 = 9
        let (_tmp, db) = db_with(&[
            ("a1", "alice", [1.0, 0.0]),
            ("a2", "alice", [2.0, 0.0]),
            ("a3", "alice", [0.5, 0.0]),
            ("a4", "alice", [3.0, 0.0]),
        ]);

        let record = score_candidate(&db, &[0.0, 0.0], "alice", RankingParams::default())
            .unwrap()
            .unwrap();

        assert!((record.aggregate_distance - 0.625).abs() < 1e-9);
        assert!((record.score - 1.0 / 1.625).abs() < 1e-9);
        let evidence: Vec<_> = record.evidence.iter().map(|e| e.fragment_id.as_str()).collect();
        assert_eq!(evidence, ["a3", "a1"]);
    }

    #[test]
    fn fewer_fragments_than_top_n_uses_what_exists() {
        let (_tmp, db) = db_with(&[("a1", "alice", [1.0, 0.0])]);
        let record = score_candidate(&db, &[0.0, 0.0], "alice", RankingParams::default())
            .unwrap()
            .unwrap();
        assert_eq!(record.evidence.len(), 1);
        assert!((record.aggregate_distance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn exact_match_scores_one_and_ranks_first() {
        let (_tmp, db) = db_with(&[
            ("b1", "bob", [0.0, 1.0]),
            ("a1", "alice", [1.0, 0.0]),
            ("c1", "carol", [0.6, 0.8]),
        ]);

        let ranked = rank(&db, &[1.0, 0.0], &ids(&["bob", "carol", "alice"]), RankingParams::new(10, 1).unwrap())
            .unwrap();

        assert_eq!(ranked[0].candidate, "alice");
        assert_eq!(ranked[0].aggregate_distance, 0.0);
        assert_eq!(ranked[0].score, 1.0);
        assert_eq!(ranked[1].candidate, "carol");
        assert_eq!(ranked[2].candidate, "bob");
    }

    #[test]
    fn ranks_are_contiguous_and_ties_break_by_id() {
        let (_tmp, db) = db_with(&[
            ("z", "zed", [1.0, 0.0]),
            ("y", "amy", [1.0, 0.0]),
            ("x", "max", [0.0, 1.0]),
        ]);

        let ranked = rank(&db, &[1.0, 0.0], &ids(&["zed", "max", "amy"]), RankingParams::default()).unwrap();

        let order: Vec<_> = ranked.iter().map(|r| r.candidate.as_str()).collect();
        assert_eq!(order, ["amy", "zed", "max"]);
        let ranks: Vec<_> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, [1, 2, 3]);
    }

    #[test]
    fn order_is_independent_of_input_order() {
        let (_tmp, db) = db_with(&[
            ("a", "alice", [0.9, 0.1]),
            ("b", "bob", [0.2, 0.8]),
            ("c", "carol", [0.5, 0.5]),
        ]);
        let params = RankingParams::default();

        let first = rank(&db, &[1.0, 0.0], &ids(&["alice", "bob", "carol"]), params).unwrap();
        let second = rank(&db, &[1.0, 0.0], &ids(&["carol", "bob", "alice"]), params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn candidates_without_fragments_are_excluded() {
        let (_tmp, db) = db_with(&[("a", "alice", [1.0, 0.0])]);

        let ranked = rank(&db, &[1.0, 0.0], &ids(&["ghost", "alice"]), RankingParams::default()).unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].candidate, "alice");
        assert_eq!(ranked[0].rank, 1);
    }

    #[test]
    fn no_rankable_candidates_is_an_error() {
        let (_tmp, db) = db_with(&[("a", "alice", [1.0, 0.0])]);
        assert!(matches!(
            rank(&db, &[1.0, 0.0], &ids(&["ghost"]), RankingParams::default()),
            Err(Error::NoRankingResults)
        ));
    }
}
