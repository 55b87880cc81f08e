use glob::{MatchOptions, Pattern};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::EtlError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Recursively collect the absolute paths of files under `root` whose name
/// matches the glob `pattern`.
///
/// A directory whose path ends with `exclude_suffix` contributes none of its
/// own files, but its subdirectories are still visited and judged on their own
/// path. An empty suffix excludes nothing.
///
/// Paths come back in traversal order, which is not sorted.
pub fn locate(
    root: impl AsRef<Path>,
    pattern: &str,
    exclude_suffix: &str,
) -> Result<Vec<PathBuf>, EtlError> {
    let root = root.as_ref();
    let discovery = |source: std::io::Error| EtlError::Discovery {
        root: root.to_path_buf(),
        source,
    };

    let pattern = Pattern::new(pattern)
        .map_err(|e| discovery(std::io::Error::new(ErrorKind::InvalidInput, e)))?;
    let root = std::path::absolute(root).map_err(discovery)?;

    let metadata = std::fs::metadata(&root).map_err(discovery)?;
    if !metadata.is_dir() {
        return Err(discovery(std::io::Error::new(
            ErrorKind::NotADirectory,
            "source root is not a directory",
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        let is_file = entry.file_type().is_file()
            || (entry.path_is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }

        if is_excluded(entry.path(), exclude_suffix) {
            continue;
        }

        let name_matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| pattern.matches_with(name, MATCH_OPTIONS));
        if name_matches {
            files.push(entry.into_path());
        }
    }

    debug!("Located {} files under {}", files.len(), root.display());
    Ok(files)
}

/// Exclusion is a plain suffix test on the immediate parent directory's path
fn is_excluded(file: &Path, exclude_suffix: &str) -> bool {
    if exclude_suffix.is_empty() {
        return false;
    }
    file.parent()
        .is_some_and(|dir| dir.to_string_lossy().ends_with(exclude_suffix))
}
