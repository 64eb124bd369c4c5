//! Run orchestration: ingest, rank and explain over one workspace.
//!
//! Each stage checks its preconditions before doing any work, so a fatal
//! failure never leaves a half-written report behind.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    config_db::ConfigDb,
    data_dir::DataDir,
    embedding::{Embedder, HashingEmbedder},
    error::{Error, Result},
    explain::{self, Explanation},
    fragment_store::FragmentStore,
    ingestion::{self, IngestedCandidate},
    llm::Generator,
    manifest::{Manifest, TextUnavailable},
    model_manager::{MODEL_ENV_VAR, ModelManager},
    ranking::{self, RankedCandidate, RankingParams},
    report,
    settings::{EmbedderKind, Settings},
    text_util,
    vector_db::VectorDb,
};

/// Progress of a per-candidate loop.
#[derive(Debug, Clone, Copy)]
pub struct Step<'a> {
    /// Zero-based position of `candidate` in the loop.
    pub index: usize,
    pub total: usize,
    pub candidate: &'a str,
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub ingested: Vec<IngestedCandidate>,
    pub skipped: Vec<(String, TextUnavailable)>,
}

impl IngestSummary {
    pub fn fragments(&self) -> usize {
        self.ingested.iter().map(|c| c.fragments).sum()
    }
}

#[derive(Debug)]
pub struct RankingRun {
    pub ranked: Vec<RankedCandidate>,
    pub csv_path: PathBuf,
    pub json_path: PathBuf,
}

#[derive(Debug)]
pub struct ExplainRun {
    pub explanations: Vec<Explanation>,
    /// Ranked candidates that got no explanation.
    pub skipped: usize,
    pub path: PathBuf,
}

/// Read and normalize a job description.
///
/// A missing or blank file is a fatal precondition failure.
pub fn read_job_description(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|_| {
        Error::Precondition(format!(
            "job description not found: {}",
            path.display()
        ))
    })?;
    let text = text_util::normalize(&String::from_utf8_lossy(&bytes));
    if text.is_empty() {
        return Err(Error::Precondition(format!(
            "job description is empty: {}",
            path.display()
        )));
    }
    Ok(text)
}

fn require_candidates(manifest: &Manifest) -> Result<()> {
    if manifest.is_empty() {
        return Err(Error::Precondition(
            "no candidates registered; run `cvscreen candidate add` first"
                .to_string(),
        ));
    }
    Ok(())
}

/// Fragment and store every candidate in the manifest.
///
/// Candidates whose text file is missing or empty are skipped, and anything
/// previously stored for them is retracted so stale evidence cannot be
/// ranked. An embedding failure aborts the run; candidates stored before it
/// stay valid for a retry.
pub fn ingest<E: Embedder>(
    store: &mut FragmentStore<E>,
    data_dir: &DataDir,
    manifest: &Manifest,
    settings: &Settings,
    mut on_step: impl FnMut(Step<'_>),
) -> Result<IngestSummary> {
    require_candidates(manifest)?;
    let chunking = settings.chunking()?;

    let mut summary = IngestSummary::default();
    for (index, entry) in manifest.entries().iter().enumerate() {
        on_step(Step {
            index,
            total: manifest.len(),
            candidate: &entry.candidate,
        });

        let text = match manifest.read_text(&entry.candidate) {
            Ok(text) => text,
            Err(reason) => {
                let removed = ingestion::retract_candidate(
                    Some(store.db()),
                    data_dir,
                    &entry.candidate,
                )?;
                warn!(candidate = %entry.candidate, %reason, removed, "skipped ingestion");
                summary.skipped.push((entry.candidate.clone(), reason));
                continue;
            }
        };

        let ingested = ingestion::ingest_candidate(
            store,
            data_dir,
            &entry.candidate,
            &text,
            chunking,
        )?;
        info!(
            candidate = %ingested.candidate,
            fragments = ingested.fragments,
            removed = ingested.summary.removed,
            "ingested"
        );
        summary.ingested.push(ingested);
    }
    Ok(summary)
}

/// Rank the manifest's candidates against a job description.
pub fn rank<E: Embedder>(
    store: &mut FragmentStore<E>,
    manifest: &Manifest,
    job_text: &str,
    params: RankingParams,
) -> Result<Vec<RankedCandidate>> {
    require_candidates(manifest)?;
    let job_vector = store.embed_query(job_text)?;
    ranking::rank(store.db(), &job_vector, &manifest.ids(), params)
}

/// Choose the embedding provider named by the settings.
///
/// `CVSCREEN_MODEL` overrides the configured ColBERT model.
pub fn build_embedder(settings: &Settings) -> Box<dyn Embedder> {
    match settings.embedder {
        EmbedderKind::Colbert => {
            let model_id = std::env::var(MODEL_ENV_VAR)
                .unwrap_or_else(|_| settings.embedding_model.clone());
            Box::new(ModelManager::with_model_id(model_id))
        }
        EmbedderKind::Hashing => Box::new(HashingEmbedder::default()),
    }
}

/// A data directory with its manifest database and resolved settings.
pub struct Workspace {
    pub data_dir: DataDir,
    pub config_db: ConfigDb,
    pub settings: Settings,
}

impl Workspace {
    pub fn open(data_dir: DataDir) -> Result<Self> {
        let config_db = ConfigDb::open(&data_dir.config_db())?;
        let settings = Settings::load(&config_db)?;
        Ok(Self {
            data_dir,
            config_db,
            settings,
        })
    }

    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::load(&self.config_db)
    }

    /// Ingest every registered candidate, creating the store if needed.
    pub fn ingest<E: Embedder>(
        &self,
        embedder: E,
        on_step: impl FnMut(Step<'_>),
    ) -> Result<IngestSummary> {
        let manifest = self.manifest()?;
        require_candidates(&manifest)?;
        let db = VectorDb::create(&self.data_dir.vectors_db())?;
        let mut store = FragmentStore::new(db, embedder);
        ingest(&mut store, &self.data_dir, &manifest, &self.settings, on_step)
    }

    /// Rank against the job description at `job_path` and write both
    /// ranking reports.
    pub fn rank<E: Embedder>(
        &self,
        job_path: &Path,
        embedder: E,
    ) -> Result<RankingRun> {
        let job_text = read_job_description(job_path)?;
        let job = report::JobFingerprint::new(job_path, &job_text);
        let params = self.settings.ranking()?;
        let db = VectorDb::open(&self.data_dir.vectors_db())?;
        let manifest = self.manifest()?;

        let mut store = FragmentStore::new(db, embedder);
        let ranked = rank(&mut store, &manifest, &job_text, params)?;

        let (csv_path, json_path) =
            report::write_ranking(&self.data_dir.reports_dir()?, &job, &ranked)?;
        info!(ranked = ranked.len(), path = %json_path.display(), "ranking written");
        Ok(RankingRun {
            ranked,
            csv_path,
            json_path,
        })
    }

    /// Explain the most recent ranking and write the explanation report.
    ///
    /// The ranking must have been computed for the same job description.
    pub fn explain<G: Generator + ?Sized>(
        &self,
        job_path: &Path,
        generator: &G,
        mut on_step: impl FnMut(Step<'_>),
    ) -> Result<ExplainRun> {
        let job_text = read_job_description(job_path)?;
        let reports = self.data_dir.reports_dir()?;
        let ranked = report::read_ranking(&reports.join(report::RANKING_JSON))?;
        report::check_ranking_job(&reports, &report::JobFingerprint::new(job_path, &job_text))?;
        let manifest = self.manifest()?;

        let total = ranked.len();
        let mut index = 0;
        let explanations =
            explain::explain(&job_text, &ranked, &manifest, generator, |record| {
                on_step(Step {
                    index,
                    total,
                    candidate: &record.candidate,
                });
                index += 1;
            });

        let path = report::write_explanations(&reports, &explanations)?;
        info!(explained = explanations.len(), path = %path.display(), "explanations written");
        Ok(ExplainRun {
            skipped: total - explanations.len(),
            explanations,
            path,
        })
    }
}
