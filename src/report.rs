use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{Error, Result},
    explain::Explanation,
    ranking::RankedCandidate,
    text_util::{DEFAULT_PREVIEW_CHARS, preview},
};

pub const RANKING_CSV: &str = "ranking_results.csv";
pub const RANKING_JSON: &str = "ranking_results.json";
pub const EXPLANATIONS_JSON: &str = "llm_explanations.json";
/// Sidecar naming the job description a ranking was computed for.
pub const RANKING_JOB: &str = "ranking_job.json";

const CSV_HEADER: &str = "rank,candidate,aggregate_distance,score,top_fragment_1_preview,top_fragment_2_preview";

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Tabular view of a ranking, one row per candidate.
pub fn ranking_csv(ranked: &[RankedCandidate]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for r in ranked {
        let fragment = |i: usize| {
            r.evidence
                .get(i)
                .map(|e| preview(&e.text, DEFAULT_PREVIEW_CHARS))
                .unwrap_or_default()
        };
        let _ = writeln!(
            out,
            "{},{},{:.4},{:.4},{},{}",
            r.rank,
            csv_field(&r.candidate),
            r.aggregate_distance,
            r.score,
            csv_field(&fragment(0)),
            csv_field(&fragment(1)),
        );
    }
    out
}

/// Identifies the job description behind a ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFingerprint {
    /// Path the job description was read from, for messages only.
    pub path: String,
    /// SHA-256 of the normalized job text.
    pub sha256: String,
}

impl JobFingerprint {
    pub fn new(path: &Path, text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Self {
            path: path.display().to_string(),
            sha256: digest.iter().map(|b| format!("{b:02x}")).collect(),
        }
    }
}

/// Write both ranking serializations into `dir`, plus the fingerprint of
/// the job they answer.
pub fn write_ranking(
    dir: &Path,
    job: &JobFingerprint,
    ranked: &[RankedCandidate],
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let csv_path = dir.join(RANKING_CSV);
    let json_path = dir.join(RANKING_JSON);
    std::fs::write(&csv_path, ranking_csv(ranked))?;
    std::fs::write(&json_path, serde_json::to_string_pretty(ranked)?)?;
    std::fs::write(dir.join(RANKING_JOB), serde_json::to_string_pretty(job)?)?;
    Ok((csv_path, json_path))
}

/// Fail unless the ranking in `dir` was computed for `job`.
pub fn check_ranking_job(dir: &Path, job: &JobFingerprint) -> Result<()> {
    let path = dir.join(RANKING_JOB);
    if !path.is_file() {
        return Err(Error::Precondition(format!(
            "ranking report does not record its job description; run `cvscreen rank --job {}` again",
            job.path
        )));
    }
    let recorded: JobFingerprint =
        serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    if recorded.sha256 != job.sha256 {
        return Err(Error::Precondition(format!(
            "ranking was computed for job description {}, not {}; run `cvscreen rank --job {}` first",
            recorded.path, job.path, job.path
        )));
    }
    Ok(())
}

/// Read the structured ranking written by [`write_ranking`].
pub fn read_ranking(path: &Path) -> Result<Vec<RankedCandidate>> {
    if !path.is_file() {
        return Err(Error::Precondition(format!(
            "ranking report not found at {}; run `cvscreen rank` first",
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn write_explanations(dir: &Path, explanations: &[Explanation]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(EXPLANATIONS_JSON);
    std::fs::write(&path, serde_json::to_string_pretty(explanations)?)?;
    Ok(path)
}

/// Human-readable ranking table.
pub fn format_ranking(ranked: &[RankedCandidate]) -> String {
    if ranked.is_empty() {
        return "No ranked candidates.\n".to_string();
    }

    let width = ranked
        .iter()
        .map(|r| r.candidate.chars().count())
        .max()
        .unwrap_or(0)
        .max("candidate".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:>4}  {:<width$}  {:>8}  {:>8}", "rank", "candidate", "distance", "score");
    for r in ranked {
        let _ = writeln!(
            out,
            "{:>4}  {:<width$}  {:>8.4}  {:>8.4}",
            r.rank, r.candidate, r.aggregate_distance, r.score
        );
        if let Some(best) = r.evidence.first() {
            let snippet = preview(&best.text.replace('\n', " "), 80);
            let _ = writeln!(out, "      {snippet}");
        }
    }
    let _ = writeln!(out, "\n{} candidate(s) ranked", ranked.len());
    out
}

/// Human-readable explanation listing.
pub fn format_explanations(explanations: &[Explanation]) -> String {
    if explanations.is_empty() {
        return "No explanations generated.\n".to_string();
    }

    let mut out = String::new();
    for e in explanations {
        let verdict = e
            .sections
            .recommendation
            .map_or_else(|| "-".to_string(), |r| r.to_string());
        let _ = writeln!(
            out,
            "=== {}. {} (score {:.4}, recommendation {verdict}) ===",
            e.rank, e.candidate, e.score
        );
        let _ = writeln!(out, "{}\n", e.narrative);
    }
    out
}
