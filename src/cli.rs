use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "cvscreen",
    about = "Rank candidate resumes against a job description and explain every decision"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage registered candidates
    Candidate {
        #[command(subcommand)]
        action: CandidateAction,
    },
    /// Fragment and embed every registered candidate
    Ingest(IngestArgs),
    /// Rank candidates against a job description
    Rank(RankArgs),
    /// Explain the latest ranking with the generative model
    Explain(ExplainArgs),
    /// Ingest, rank and explain in one run
    Screen(ScreenArgs),
    /// Show workspace status and statistics
    Status(JsonArgs),
    /// Check that the model service is reachable and has the model
    Health(JsonArgs),
    /// Delete the fragment vector store
    Reset,
    /// Manage persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Candidate subcommands --

#[derive(Debug, Subcommand)]
pub enum CandidateAction {
    /// Register extracted resume text (a .txt file or a directory of them)
    Add {
        /// Path to a .txt file or a directory
        path: PathBuf,
        /// Only register files whose relative path matches this glob
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Remove a candidate and all of its stored fragments
    Remove {
        /// Candidate id (file name without extension)
        id: String,
    },
    /// List registered candidates
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Settings subcommands --

#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Show resolved settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate and persist one setting
    Set { key: String, value: String },
    /// Remove a persisted setting, or all of them
    Clear {
        /// Setting to clear; clears everything when omitted
        key: Option<String>,
    },
}

// -- Pipeline stages --

/// Per-run overrides of the fragmentation settings.
#[derive(Debug, Clone, Default, Args)]
pub struct FragmentOverrides {
    /// Fragment size in characters
    #[arg(long)]
    pub fragment_size: Option<usize>,

    /// Characters shared by adjacent fragments
    #[arg(long)]
    pub fragment_overlap: Option<usize>,
}

/// Per-run overrides of the aggregation settings.
#[derive(Debug, Clone, Default, Args)]
pub struct RankOverrides {
    /// Fragments retrieved per candidate
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Smallest distances averaged into the candidate score
    #[arg(long)]
    pub top_n: Option<usize>,
}

/// Per-run overrides of the model service settings.
#[derive(Debug, Clone, Default, Args)]
pub struct LlmOverrides {
    /// Generative model name
    #[arg(long)]
    pub llm_model: Option<String>,

    /// Model service base URL
    #[arg(long)]
    pub llm_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub llm_timeout_secs: Option<u64>,
}

#[derive(Debug, Parser)]
pub struct IngestArgs {
    #[command(flatten)]
    pub fragments: FragmentOverrides,
}

#[derive(Debug, Parser)]
pub struct RankArgs {
    /// Job description text file
    #[arg(long)]
    pub job: PathBuf,

    #[command(flatten)]
    pub ranking: RankOverrides,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ExplainArgs {
    /// Job description text file
    #[arg(long)]
    pub job: PathBuf,

    #[command(flatten)]
    pub llm: LlmOverrides,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ScreenArgs {
    /// Job description text file
    #[arg(long)]
    pub job: PathBuf,

    #[command(flatten)]
    pub fragments: FragmentOverrides,

    #[command(flatten)]
    pub ranking: RankOverrides,

    #[command(flatten)]
    pub llm: LlmOverrides,

    /// Stop after ranking
    #[arg(long)]
    pub no_explain: bool,
}

impl FragmentOverrides {
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = self.fragment_size {
            pairs.push(("fragment_size", v.to_string()));
        }
        if let Some(v) = self.fragment_overlap {
            pairs.push(("fragment_overlap", v.to_string()));
        }
        pairs
    }
}

impl RankOverrides {
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = self.pool_size {
            pairs.push(("pool_size", v.to_string()));
        }
        if let Some(v) = self.top_n {
            pairs.push(("top_n", v.to_string()));
        }
        pairs
    }
}

impl LlmOverrides {
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = &self.llm_model {
            pairs.push(("llm_model", v.clone()));
        }
        if let Some(v) = &self.llm_url {
            pairs.push(("llm_url", v.clone()));
        }
        if let Some(v) = self.llm_timeout_secs {
            pairs.push(("llm_timeout_secs", v.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "cvscreen",
            &mut std::io::stdout(),
        );
    }
}
