use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use globset::GlobMatcher;

use crate::error::{Error, Result};

/// A discovered candidate text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Candidate identifier: the file name without its extension.
    pub candidate: String,
    /// Path relative to the directory that was walked.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

/// Extracted resume text is plain text only.
const SUPPORTED_EXTENSIONS: &[&str] = &["txt"];

/// Discover candidate text files under `root`.
///
/// `root` may be a directory (walked recursively, hidden entries skipped)
/// or a single file. When `pattern` is given, only files whose relative
/// path matches it are kept. Results are sorted by relative path, and two
/// files resolving to the same candidate id are rejected.
pub fn discover_files(
    root: &Path,
    pattern: Option<&GlobMatcher>,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize().map_err(|e| {
        Error::Config(format!("cannot resolve path {}: {e}", root.display()))
    })?;

    let mut results = Vec::new();
    if canonical_root.is_file() {
        if !is_supported(&canonical_root) {
            return Err(Error::Config(format!(
                "not a .txt file: {}",
                root.display()
            )));
        }
        let file_name = canonical_root
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        if let Some(df) = make_discovered(&file_name, &canonical_root) {
            results.push(df);
        }
    } else {
        walk_dir(&canonical_root, &canonical_root, &mut results)?;
    }

    if let Some(matcher) = pattern {
        results.retain(|f| matcher.is_match(&f.relative_path));
    }
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    ensure_unique(&results)?;
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = entry.path().canonicalize() else {
                continue; // Broken symlink
            };
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if resolved.is_file()
                && is_supported(&resolved)
                && let Some(df) = make_discovered(relative, &resolved)
            {
                results.push(df);
            }
        } else if file_type.is_file() && is_supported(&entry.path()) {
            let abs = entry.path().canonicalize()?;
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if let Some(df) = make_discovered(relative, &abs) {
                results.push(df);
            }
        }
    }
    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

/// Candidate id for a text file, `None` for names that are not UTF-8.
pub fn candidate_id(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?.trim();
    (!stem.is_empty()).then(|| stem.to_string())
}

fn make_discovered(relative: &Path, absolute: &Path) -> Option<DiscoveredFile> {
    Some(DiscoveredFile {
        candidate: candidate_id(relative)?,
        relative_path: relative.to_path_buf(),
        absolute_path: absolute.to_path_buf(),
    })
}

fn ensure_unique(files: &[DiscoveredFile]) -> Result<()> {
    let mut seen: BTreeMap<&str, &Path> = BTreeMap::new();
    for file in files {
        if let Some(previous) =
            seen.insert(&file.candidate, &file.relative_path)
        {
            return Err(Error::Config(format!(
                "candidate id '{}' is used by both {} and {}",
                file.candidate,
                previous.display(),
                file.relative_path.display()
            )));
        }
    }
    Ok(())
}
