use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    config_db::ConfigDb,
    error::{Error, Result},
    walker::DiscoveredFile,
};

/// One registered candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub candidate: String,
    /// Plain-text extraction of the candidate's resume.
    pub text_path: PathBuf,
}

/// Why a candidate's text could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextUnavailable {
    NotRegistered,
    Missing(PathBuf),
    Empty(PathBuf),
}

impl fmt::Display for TextUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRegistered => f.write_str("not registered"),
            Self::Missing(path) => {
                write!(f, "missing text file {}", path.display())
            }
            Self::Empty(path) => write!(f, "empty text file {}", path.display()),
        }
    }
}

/// The explicit set of candidates one run operates on.
///
/// Read from [`ConfigDb`] once per run and handed to every stage, so which
/// candidates take part never depends on what happens to be on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn load(config_db: &ConfigDb) -> Result<Self> {
        Ok(Self::from_entries(
            config_db
                .list_candidates()?
                .into_iter()
                .map(|(candidate, path)| ManifestEntry {
                    candidate,
                    text_path: PathBuf::from(path),
                }),
        ))
    }

    /// Build a manifest, sorted by candidate id. A later entry for the
    /// same id replaces an earlier one.
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        let mut entries: Vec<ManifestEntry> = entries.into_iter().collect();
        entries.reverse();
        entries.sort_by(|a, b| a.candidate.cmp(&b.candidate));
        entries.dedup_by(|a, b| a.candidate == b.candidate);
        Self { entries }
    }

    /// Record discovered files in the candidate manifest.
    ///
    /// Re-registering a candidate at the same path is a no-op; the same id
    /// at a different path is rejected so one candidate cannot silently
    /// take over another's fragments.
    pub fn register(
        config_db: &ConfigDb,
        files: &[DiscoveredFile],
    ) -> Result<usize> {
        let mut fresh = Vec::new();
        for file in files {
            let path = file.absolute_path.to_string_lossy().to_string();
            match config_db.get_candidate(&file.candidate)? {
                Some(existing) if existing == path => {}
                Some(existing) => {
                    return Err(Error::Config(format!(
                        "candidate '{}' is already registered from {existing}",
                        file.candidate
                    )));
                }
                None => fresh.push((file.candidate.clone(), path)),
            }
        }
        config_db.batch_set_candidates(&fresh)?;
        Ok(fresh.len())
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.candidate.clone()).collect()
    }

    pub fn get(&self, candidate: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.candidate.as_str().cmp(candidate))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Full text of a candidate, trimmed.
    pub fn read_text(
        &self,
        candidate: &str,
    ) -> std::result::Result<String, TextUnavailable> {
        let entry = self.get(candidate).ok_or(TextUnavailable::NotRegistered)?;
        read_text_file(&entry.text_path)
    }
}

fn read_text_file(path: &Path) -> std::result::Result<String, TextUnavailable> {
    let bytes = std::fs::read(path)
        .map_err(|_| TextUnavailable::Missing(path.to_path_buf()))?;
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    if text.is_empty() {
        return Err(TextUnavailable::Empty(path.to_path_buf()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::discover_files;

    fn entry(candidate: &str, path: &str) -> ManifestEntry {
        ManifestEntry {
            candidate: candidate.to_string(),
            text_path: PathBuf::from(path),
        }
    }

    #[test]
    fn entries_sorted_and_deduplicated() {
        let manifest = Manifest::from_entries([
            entry("zoe", "/z.txt"),
            entry("adam", "/a-old.txt"),
            entry("adam", "/a.txt"),
        ]);
        assert_eq!(manifest.ids(), vec!["adam", "zoe"]);
        assert_eq!(manifest.get("adam").unwrap().text_path, PathBuf::from("/a.txt"));
        assert!(manifest.get("nobody").is_none());
    }

    #[test]
    fn register_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let cvs = tmp.path().join("cvs");
        std::fs::create_dir(&cvs).unwrap();
        std::fs::write(cvs.join("bob.txt"), "Bob").unwrap();
        std::fs::write(cvs.join("alice.txt"), "Alice").unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();

        let files = discover_files(&cvs, None).unwrap();
        assert_eq!(Manifest::register(&db, &files).unwrap(), 2);
        assert_eq!(Manifest::register(&db, &files).unwrap(), 0);

        let manifest = Manifest::load(&db).unwrap();
        assert_eq!(manifest.ids(), vec!["alice", "bob"]);
        assert_eq!(manifest.read_text("alice").unwrap(), "Alice");
    }

    #[test]
    fn register_rejects_id_from_another_path() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();
        std::fs::write(a.join("alice.txt"), "one").unwrap();
        std::fs::write(b.join("alice.txt"), "two").unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();

        Manifest::register(&db, &discover_files(&a, None).unwrap()).unwrap();
        let err = Manifest::register(&db, &discover_files(&b, None).unwrap());
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn read_text_reports_missing_and_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let empty = tmp.path().join("empty.txt");
        std::fs::write(&empty, "  \n\t").unwrap();
        let gone = tmp.path().join("gone.txt");

        let manifest = Manifest::from_entries([
            ManifestEntry { candidate: "empty".into(), text_path: empty.clone() },
            ManifestEntry { candidate: "gone".into(), text_path: gone.clone() },
        ]);

        assert_eq!(manifest.read_text("empty"), Err(TextUnavailable::Empty(empty)));
        assert_eq!(manifest.read_text("gone"), Err(TextUnavailable::Missing(gone)));
        assert_eq!(manifest.read_text("ghost"), Err(TextUnavailable::NotRegistered));
    }
}
