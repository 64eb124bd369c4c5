//! Grounded explanations for ranked candidates.
//!
//! Retrieval decides which candidates matter; the explanation reasons over
//! each candidate's complete text, never only the matched fragments.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    llm::Generator,
    manifest::Manifest,
    ranking::RankedCandidate,
    text_util,
};

/// Hiring recommendation requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Accept,
    Consider,
    Reject,
}

impl Recommendation {
    const ALL: [Recommendation; 3] = [Self::Accept, Self::Consider, Self::Reject];

    fn keyword(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Consider => "consider",
            Self::Reject => "reject",
        }
    }

    /// Find the single recommendation named in free text.
    ///
    /// Returns `None` when no keyword or more than one distinct keyword
    /// appears (a model echoing "Accept / Consider / Reject" decided
    /// nothing).
    pub fn detect(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        let mut found = Self::ALL.into_iter().filter(|r| {
            lower
                .split(|c: char| !c.is_alphabetic())
                .any(|word| word == r.keyword())
        });
        let first = found.next()?;
        found.next().is_none().then_some(first)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("Accept"),
            Self::Consider => f.write_str("Consider"),
            Self::Reject => f.write_str("Reject"),
        }
    }
}

/// The five requested sections, parsed best-effort from the narrative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sections {
    pub summary: Option<String>,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub recommendation: Option<Recommendation>,
    pub justification: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    Strengths,
    Gaps,
    Recommendation,
    Justification,
}

const HEADINGS: &[(&str, Section)] = &[
    ("summary", Section::Summary),
    ("strengths", Section::Strengths),
    ("gaps", Section::Gaps),
    ("missing skills", Section::Gaps),
    ("recommendation", Section::Recommendation),
    ("short justification", Section::Justification),
    ("justification", Section::Justification),
];

/// Recognise a section heading such as `1) Summary (3-5 lines)`,
/// `**Strengths:**` or `Recommendation: Consider`, returning the section
/// and any text that follows the colon on the same line.
fn parse_heading(line: &str) -> Option<(Section, &str)> {
    let rest = line
        .trim()
        .trim_start_matches(|c: char| c == '#' || c == '*' || c.is_whitespace());
    let rest = rest
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches([')', '.'])
        .trim_start_matches(|c: char| c == '*' || c.is_whitespace());

    HEADINGS.iter().find_map(|&(keyword, section)| {
        let head = rest.get(..keyword.len())?;
        if !head.eq_ignore_ascii_case(keyword) {
            return None;
        }
        let mut after = rest[keyword.len()..]
            .trim_start_matches(|c: char| c == '*' || c.is_whitespace());
        if let Some(qualified) = after.strip_prefix('(') {
            after = qualified.split_once(')').map_or("", |(_, tail)| tail);
        } else if after.starts_with('/') {
            after = after.find(':').map_or("", |i| &after[i..]);
        }
        let after = after.trim_start_matches(|c: char| c == '*' || c.is_whitespace());
        if after.is_empty() {
            Some((section, ""))
        } else {
            let inline = after.strip_prefix(':')?;
            Some((section, inline.trim().trim_matches('*').trim()))
        }
    })
}

fn strip_bullet(line: &str) -> &str {
    line.trim()
        .trim_start_matches(['-', '*', '•', '·'])
        .trim()
}

impl Sections {
    pub fn parse(narrative: &str) -> Self {
        let mut collected: Vec<(Section, Vec<&str>)> = Vec::new();

        for line in narrative.lines() {
            if let Some((section, inline)) = parse_heading(line) {
                collected.push((section, Vec::new()));
                if !inline.is_empty()
                    && let Some((_, lines)) = collected.last_mut()
                {
                    lines.push(inline);
                }
            } else if let Some((_, lines)) = collected.last_mut() {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed);
                }
            }
        }

        let mut sections = Self::default();
        for (section, lines) in collected {
            match section {
                Section::Summary if sections.summary.is_none() => {
                    sections.summary = join(&lines);
                }
                Section::Strengths => sections.strengths.extend(bullets(&lines)),
                Section::Gaps => sections.gaps.extend(bullets(&lines)),
                Section::Recommendation if sections.recommendation.is_none() => {
                    sections.recommendation = Recommendation::detect(&lines.join(" "));
                }
                Section::Justification if sections.justification.is_none() => {
                    sections.justification = join(&lines);
                }
                _ => {}
            }
        }
        sections
    }
}

fn join(lines: &[&str]) -> Option<String> {
    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn bullets<'a>(lines: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    lines
        .iter()
        .map(|l| strip_bullet(l))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// One candidate's grounded explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub rank: usize,
    pub candidate: String,
    pub score: f64,
    /// Raw model output, or an error surrogate when generation failed.
    pub narrative: String,
    pub sections: Sections,
}

/// Build the prompt for one candidate.
pub fn build_prompt(job_text: &str, candidate_text: &str, score: f64, candidate: &str) -> String {
    format!(
        "You are an expert recruitment assistant.

TASK:
Compare the candidate CV to the job description and provide an explainable decision.

JOB DESCRIPTION:
{job_text}

CANDIDATE CV ({candidate}):
{candidate_text}

Similarity score (higher is better): {score:.4}

OUTPUT FORMAT (strict):
1) Summary (3-5 lines)
2) Strengths (bullet points)
3) Gaps / Missing skills (bullet points)
4) Recommendation: Accept / Consider / Reject
5) Short justification (2-3 lines)

Be concise, factual, and grounded in the provided CV/JD only."
    )
}

/// Explain one ranked candidate from its full text.
///
/// Generation failures never escape: the error surrogate becomes the
/// narrative.
pub fn explain_candidate<G: Generator + ?Sized>(
    job_text: &str,
    record: &RankedCandidate,
    candidate_text: &str,
    generator: &G,
) -> Explanation {
    let prompt = build_prompt(job_text, candidate_text, record.score, &record.candidate);
    let narrative = match generator.generate(&prompt) {
        Ok(text) => text_util::repair_bullets(text.trim()),
        Err(e) => {
            warn!(candidate = %record.candidate, error = %e, "explanation failed");
            e.surrogate()
        }
    };

    Explanation {
        rank: record.rank,
        candidate: record.candidate.clone(),
        score: record.score,
        sections: Sections::parse(&narrative),
        narrative,
    }
}

/// Explain every ranked candidate, in rank order, one model call each.
///
/// Candidates whose text is missing or empty are skipped; the rest keep
/// their relative order. `on_step` runs once per ranked record.
pub fn explain<G: Generator + ?Sized>(
    job_text: &str,
    ranked: &[RankedCandidate],
    manifest: &Manifest,
    generator: &G,
    mut on_step: impl FnMut(&RankedCandidate),
) -> Vec<Explanation> {
    let mut explanations = Vec::with_capacity(ranked.len());
    for record in ranked {
        on_step(record);
        match manifest.read_text(&record.candidate) {
            Ok(text) => {
                info!(candidate = %record.candidate, rank = record.rank, "generating explanation");
                explanations.push(explain_candidate(job_text, record, &text, generator));
            }
            Err(reason) => {
                warn!(candidate = %record.candidate, %reason, "skipped explanation");
            }
        }
    }
    explanations
}
