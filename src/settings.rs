use std::{fmt, str::FromStr, time::Duration};

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config_db::ConfigDb,
    error::{Error, Result},
    llm::LlmConfig,
    model_manager::DEFAULT_MODEL_ID,
    ranking::{DEFAULT_POOL_SIZE, DEFAULT_TOP_N, RankingParams},
};

pub const DEFAULT_LLM_URL: &str = "http://localhost:11434";
pub const DEFAULT_LLM_MODEL: &str = "llama3.2:3b";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// Every key accepted by `settings set`.
pub const KEYS: &[&str] = &[
    "fragment_size",
    "fragment_overlap",
    "pool_size",
    "top_n",
    "embedder",
    "embedding_model",
    "llm_url",
    "llm_model",
    "llm_timeout_secs",
];

/// Which embedding provider backs the fragment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// Pooled ColBERT vectors from a local model.
    Colbert,
    /// Offline feature hashing.
    Hashing,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "colbert" => Ok(Self::Colbert),
            "hashing" => Ok(Self::Hashing),
            other => Err(Error::Config(format!(
                "unknown embedder '{other}' (expected 'colbert' or 'hashing')"
            ))),
        }
    }
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Colbert => f.write_str("colbert"),
            Self::Hashing => f.write_str("hashing"),
        }
    }
}

/// Resolved configuration for one run.
///
/// Built from defaults, overlaid with values persisted in `config.redb`,
/// then handed to each component. Nothing reads configuration from
/// ambient state after this point.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub fragment_size: usize,
    pub fragment_overlap: usize,
    pub pool_size: usize,
    pub top_n: usize,
    pub embedder: EmbedderKind,
    pub embedding_model: String,
    pub llm_url: String,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fragment_size: DEFAULT_CHUNK_SIZE,
            fragment_overlap: DEFAULT_CHUNK_OVERLAP,
            pool_size: DEFAULT_POOL_SIZE,
            top_n: DEFAULT_TOP_N,
            embedder: EmbedderKind::Colbert,
            embedding_model: DEFAULT_MODEL_ID.to_string(),
            llm_url: DEFAULT_LLM_URL.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            llm_timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Defaults overlaid with every persisted setting.
    pub fn load(config_db: &ConfigDb) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in config_db.list_settings()? {
            settings.apply(&key, &value)?;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Validate and persist one setting.
    pub fn persist(config_db: &ConfigDb, key: &str, value: &str) -> Result<()> {
        let mut candidate = Self::load(config_db)?;
        candidate.apply(key, value)?;
        candidate.validate()?;
        config_db.set_setting(key, value)
    }

    /// Overwrite one field from its string form.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "fragment_size" => self.fragment_size = parse(key, value)?,
            "fragment_overlap" => self.fragment_overlap = parse(key, value)?,
            "pool_size" => self.pool_size = parse(key, value)?,
            "top_n" => self.top_n = parse(key, value)?,
            "embedder" => self.embedder = value.parse()?,
            "embedding_model" => self.embedding_model = value.to_string(),
            "llm_url" => self.llm_url = value.to_string(),
            "llm_model" => self.llm_model = value.to_string(),
            "llm_timeout_secs" => self.llm_timeout_secs = parse(key, value)?,
            other => {
                return Err(Error::Config(format!(
                    "unknown setting '{other}' (known: {})",
                    KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Reject combinations no component can run with.
    pub fn validate(&self) -> Result<()> {
        ChunkingConfig::new(self.fragment_size, self.fragment_overlap)?;
        RankingParams::new(self.pool_size, self.top_n)?;
        if self.llm_timeout_secs == 0 {
            return Err(Error::Config(
                "llm_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// `(key, value)` pairs in [`KEYS`] order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("fragment_size", self.fragment_size.to_string()),
            ("fragment_overlap", self.fragment_overlap.to_string()),
            ("pool_size", self.pool_size.to_string()),
            ("top_n", self.top_n.to_string()),
            ("embedder", self.embedder.to_string()),
            ("embedding_model", self.embedding_model.clone()),
            ("llm_url", self.llm_url.clone()),
            ("llm_model", self.llm_model.clone()),
            ("llm_timeout_secs", self.llm_timeout_secs.to_string()),
        ]
    }

    pub fn chunking(&self) -> Result<ChunkingConfig> {
        ChunkingConfig::new(self.fragment_size, self.fragment_overlap)
    }

    pub fn ranking(&self) -> Result<RankingParams> {
        RankingParams::new(self.pool_size, self.top_n)
    }

    pub fn llm(&self) -> LlmConfig {
        LlmConfig {
            base_url: self.llm_url.clone(),
            model: self.llm_model.clone(),
            timeout: Duration::from_secs(self.llm_timeout_secs),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("invalid value '{value}' for setting '{key}'"))
    })
}
