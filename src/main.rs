use std::path::Path;

use clap::Parser;
use cvscreen::{
    ConfigDb,
    VectorDb,
    cli::{CandidateAction, Cli, Command, SettingsAction},
    error::{self, Error},
    ingestion,
    llm::{self, OllamaClient},
    manifest::Manifest,
    pipeline::{self, Step, Workspace},
    report,
    settings::{KEYS, Settings},
    walker,
};
use kdam::{Bar, BarExt, tqdm};
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "CVSCREEN_LOG";

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var(LOG_ENV_VAR) {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Terminal progress for a per-candidate loop. The bar appears on the
/// first step, once the total is known.
struct Progress {
    desc: &'static str,
    bar: Option<Bar>,
}

impl Progress {
    fn new(desc: &'static str) -> Self {
        Self { desc, bar: None }
    }

    fn step(&mut self, step: Step<'_>) {
        let bar = self
            .bar
            .get_or_insert_with(|| tqdm!(total = step.total, desc = self.desc));
        let _ = bar.update(1);
    }

    fn finish(self) {
        if let Some(mut bar) = self.bar {
            let _ = bar.refresh();
            eprintln!();
        }
    }
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = cvscreen::DataDir::resolve(cli.data_dir.as_deref())?;
    let mut workspace = Workspace::open(data_dir)?;

    match cli.command {
        Command::Candidate { action } => match action {
            CandidateAction::Add { path, pattern } => {
                candidate_add(&workspace.config_db, &path, pattern.as_deref())?;
            }
            CandidateAction::Remove { id } => {
                candidate_remove(&workspace, &id)?;
            }
            CandidateAction::List { json } => {
                candidate_list(&workspace.config_db, json)?;
            }
        },
        Command::Ingest(args) => {
            overlay(&mut workspace.settings, args.fragments.pairs())?;
            cmd_ingest(&workspace)?;
        }
        Command::Rank(args) => {
            overlay(&mut workspace.settings, args.ranking.pairs())?;
            cmd_rank(&workspace, &args.job, args.json)?;
        }
        Command::Explain(args) => {
            overlay(&mut workspace.settings, args.llm.pairs())?;
            cmd_explain(&workspace, &args.job, args.json)?;
        }
        Command::Screen(args) => {
            let mut pairs = args.fragments.pairs();
            pairs.extend(args.ranking.pairs());
            pairs.extend(args.llm.pairs());
            overlay(&mut workspace.settings, pairs)?;

            cmd_ingest(&workspace)?;
            cmd_rank(&workspace, &args.job, false)?;
            if !args.no_explain {
                cmd_explain(&workspace, &args.job, false)?;
            }
        }
        Command::Status(args) => {
            cmd_status(&workspace, args.json)?;
        }
        Command::Health(args) => {
            cmd_health(&workspace.settings, args.json)?;
        }
        Command::Reset => {
            cmd_reset(&workspace)?;
        }
        Command::Settings { action } => match action {
            SettingsAction::Show { json } => {
                settings_show(&workspace, json)?;
            }
            SettingsAction::Set { key, value } => {
                Settings::persist(&workspace.config_db, &key, &value)?;
                println!("Set {key} = {value}");
            }
            SettingsAction::Clear { key } => {
                settings_clear(&workspace.config_db, key.as_deref())?;
            }
        },
        // Handled before the data directory is touched.
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Apply per-run flag overrides on top of the persisted settings.
fn overlay(
    settings: &mut Settings,
    pairs: Vec<(&'static str, String)>,
) -> error::Result<()> {
    for (key, value) in pairs {
        settings.apply(key, &value)?;
    }
    settings.validate()
}

fn candidate_add(
    config_db: &ConfigDb,
    path: &Path,
    pattern: Option<&str>,
) -> error::Result<()> {
    let matcher = pattern
        .map(|p| {
            globset::Glob::new(p)
                .map(|glob| glob.compile_matcher())
                .map_err(|e| {
                    Error::Config(format!("invalid glob pattern: {e}"))
                })
        })
        .transpose()?;

    let files = walker::discover_files(path, matcher.as_ref())?;
    if files.is_empty() {
        eprintln!("No .txt files found under {}", path.display());
        return Ok(());
    }

    let added = Manifest::register(config_db, &files)?;
    for file in &files {
        println!("{}\t{}", file.candidate, file.absolute_path.display());
    }
    println!(
        "Registered {added} new candidate(s), {} already known",
        files.len() - added
    );
    Ok(())
}

fn candidate_remove(workspace: &Workspace, id: &str) -> error::Result<()> {
    if workspace.config_db.get_candidate(id)?.is_none() {
        return Err(Error::NotFound {
            kind: "candidate",
            name: id.to_string(),
        });
    }

    let vectors = workspace.data_dir.vectors_db();
    let db = if vectors.is_file() {
        Some(VectorDb::open(&vectors)?)
    } else {
        None
    };
    let removed =
        ingestion::retract_candidate(db.as_ref(), &workspace.data_dir, id)?;

    workspace.config_db.remove_candidate(id)?;
    println!("Removed candidate '{id}' ({removed} fragment(s))");
    Ok(())
}

fn candidate_list(config_db: &ConfigDb, json: bool) -> error::Result<()> {
    let candidates = config_db.list_candidates()?;

    if json {
        let rows: Vec<_> = candidates
            .iter()
            .map(|(id, path)| serde_json::json!({ "candidate": id, "path": path }))
            .collect();
        println!("{}", serde_json::to_string(&rows)?);
    } else if candidates.is_empty() {
        println!("No candidates registered.");
    } else {
        for (id, path) in &candidates {
            println!("{id}\t{path}");
        }
    }
    Ok(())
}

fn cmd_ingest(workspace: &Workspace) -> error::Result<()> {
    let embedder = pipeline::build_embedder(&workspace.settings);
    let mut progress = Progress::new("Ingesting");
    let result = workspace.ingest(embedder, |step| progress.step(step));
    progress.finish();
    let summary = result?;

    println!(
        "Ingested {} candidate(s) into {} fragment(s)",
        summary.ingested.len(),
        summary.fragments()
    );
    for (candidate, reason) in &summary.skipped {
        eprintln!("Skipped {candidate}: {reason}");
    }
    Ok(())
}

fn cmd_rank(workspace: &Workspace, job: &Path, json: bool) -> error::Result<()> {
    let embedder = pipeline::build_embedder(&workspace.settings);
    let run = workspace.rank(job, embedder)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run.ranked)?);
    } else {
        print!("{}", report::format_ranking(&run.ranked));
        eprintln!(
            "Wrote {} and {}",
            run.csv_path.display(),
            run.json_path.display()
        );
    }
    Ok(())
}

fn cmd_explain(
    workspace: &Workspace,
    job: &Path,
    json: bool,
) -> error::Result<()> {
    let client = OllamaClient::new(workspace.settings.llm()).map_err(|e| {
        Error::Config(format!("cannot build model client: {e}"))
    })?;

    let mut progress = Progress::new("Explaining");
    let result = workspace.explain(job, &client, |step| progress.step(step));
    progress.finish();
    let run = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run.explanations)?);
    } else {
        print!("{}", report::format_explanations(&run.explanations));
        if run.skipped > 0 {
            eprintln!("{} ranked candidate(s) had no usable text", run.skipped);
        }
        eprintln!("Wrote {}", run.path.display());
    }
    Ok(())
}

fn cmd_status(workspace: &Workspace, json: bool) -> error::Result<()> {
    let settings = &workspace.settings;
    let candidates = workspace.config_db.list_candidates()?;
    let vectors = workspace.data_dir.vectors_db();
    let (fragments, stored) = if vectors.is_file() {
        let db = VectorDb::open(&vectors)?;
        (Some(db.count()?), db.candidates()?.len())
    } else {
        (None, 0)
    };
    let ranking = workspace
        .data_dir
        .reports_dir()?
        .join(report::RANKING_JSON);

    if json {
        let status = serde_json::json!({
            "data_dir": workspace.data_dir.root(),
            "embedder": settings.embedder.to_string(),
            "embedding_model": settings.embedding_model,
            "llm_model": settings.llm_model,
            "candidates": candidates.len(),
            "stored_candidates": stored,
            "fragments": fragments,
            "ranking_report": ranking.is_file(),
        });
        println!("{status}");
    } else {
        println!("Data directory: {}", workspace.data_dir.root().display());
        println!("Embedder: {} ({})", settings.embedder, settings.embedding_model);
        println!("Generative model: {}", settings.llm_model);
        println!("Candidates: {}", candidates.len());
        match fragments {
            Some(n) => println!("Fragments: {n} across {stored} candidate(s)"),
            None => println!("Fragments: vector store not created yet"),
        }
        if ranking.is_file() {
            println!("Ranking report: {}", ranking.display());
        }
    }
    Ok(())
}

fn cmd_health(settings: &Settings, json: bool) -> error::Result<()> {
    let config = settings.llm();
    let health = llm::check_health(&config);

    if json {
        println!("{}", serde_json::to_string(&health)?);
        return Ok(());
    }

    println!(
        "Model service ({}): {}",
        config.base_url,
        if health.service_reachable { "OK" } else { "Not reachable" }
    );
    println!(
        "Required model ({}): {}",
        config.model,
        if health.model_present { "Available" } else { "Missing" }
    );
    if !health.service_reachable {
        eprintln!("Start the model service and try again.");
    } else if !health.model_present {
        eprintln!("Model not found. Run: ollama pull {}", config.model);
    } else {
        println!("System prerequisites look good.");
    }
    Ok(())
}

fn cmd_reset(workspace: &Workspace) -> error::Result<()> {
    let vectors = workspace.data_dir.vectors_db();
    if vectors.is_file() {
        std::fs::remove_file(&vectors)?;
        println!("Deleted vector store {}", vectors.display());
    } else {
        println!("No vector store at {}", vectors.display());
    }
    Ok(())
}

fn settings_show(workspace: &Workspace, json: bool) -> error::Result<()> {
    let persisted = workspace.config_db.list_settings()?;
    let is_persisted = |key: &str| persisted.iter().any(|(k, _)| k == key);
    let entries = workspace.settings.entries();

    if json {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
            .collect();
        println!("{}", serde_json::Value::Object(map));
    } else {
        for (key, value) in entries {
            let origin = if is_persisted(key) { "" } else { " (default)" };
            println!("{key} = {value}{origin}");
        }
    }
    Ok(())
}

fn settings_clear(config_db: &ConfigDb, key: Option<&str>) -> error::Result<()> {
    match key {
        Some(key) => {
            if !KEYS.contains(&key) {
                return Err(Error::Config(format!(
                    "unknown setting '{key}' (known: {})",
                    KEYS.join(", ")
                )));
            }
            if config_db.remove_setting(key)? {
                println!("Cleared {key}");
            } else {
                println!("{key} was not set");
            }
        }
        None => {
            let persisted = config_db.list_settings()?;
            for (key, _) in &persisted {
                config_db.remove_setting(key)?;
            }
            println!("Cleared {} setting(s)", persisted.len());
        }
    }
    Ok(())
}
