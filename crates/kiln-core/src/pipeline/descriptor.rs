//! Build descriptor discovery.
//!
//! The whole extracted tree is searched. When several files match, the
//! shallowest wins and ties are broken by path order, so the choice does not
//! depend on directory iteration order.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Find the build descriptor named `name` anywhere under `root`.
///
/// `Ok(None)` when nothing matches. A walk error (unreadable directory,
/// vanished entry) is returned as `Err`.
pub fn find_descriptor(root: &Path, name: &str) -> Result<Option<PathBuf>, walkdir::Error> {
    let mut best: Option<(usize, PathBuf)> = None;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.file_name() != name {
            continue;
        }
        let candidate = (entry.depth(), entry.into_path());
        best = match best {
            Some(current) if current <= candidate => Some(current),
            _ => Some(candidate),
        };
    }

    Ok(best.map(|(_, path)| path))
}
