//! Locating database files under the configured search roots.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Find a file named exactly `name` beneath any of `roots`.
///
/// Roots are searched in order and the first root with a match wins. Within
/// a root, entries are visited in file-name order so repeated searches agree.
/// Roots that do not exist or are not directories are skipped.
pub fn find_workspace_file(name: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    for root in roots {
        if !root.is_dir() {
            debug!("Skipping search root {}: not a directory", root.display());
            continue;
        }
        if let Some(found) = search_root(name, root) {
            debug!("Found {} at {}", name, found.display());
            return Some(found);
        }
    }

    debug!("{} not found in {} search root(s)", name, roots.len());
    None
}

fn search_root(name: &str, root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
}
