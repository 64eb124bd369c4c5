use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "CVSCREEN_DATA_DIR";

/// Workspace layout for one screening setup.
///
/// ```text
/// <root>/config.redb        candidate manifest and settings
/// <root>/vectors.redb       fragment vector store
/// <root>/chunks/<id>.json   fragment files
/// <root>/reports/           ranking and explanation reports
/// ```
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The CVSCREEN_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/cvscreen/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("cvscreen")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    pub fn vectors_db(&self) -> PathBuf {
        self.root.join("vectors.redb")
    }

    pub fn chunks_dir(&self) -> Result<PathBuf> {
        self.subdir("chunks")
    }

    /// Fragment file for one candidate.
    pub fn chunk_file(&self, candidate: &str) -> Result<PathBuf> {
        Ok(self.chunks_dir()?.join(format!("{candidate}.json")))
    }

    pub fn reports_dir(&self) -> Result<PathBuf> {
        self.subdir("reports")
    }

    fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
