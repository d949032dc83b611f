//! Photo discovery under a pictures folder.

use std::path::{Path, PathBuf};

use glob::{glob_with, MatchOptions, Pattern};
use nodepix_recon::EvidenceSource;

/// PNG files under any `<source>` directory below `root`, sorted.
///
/// Extension and directory name are matched case-insensitively. Unreadable
/// entries are skipped with a warning.
pub fn find_photos(root: &Path, source: EvidenceSource) -> Result<Vec<PathBuf>, String> {
    let pattern = format!(
        "{}/**/{}/**/*.png",
        Pattern::escape(&root.to_string_lossy()),
        source.folder_name()
    );
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let mut photos = Vec::new();
    for entry in glob_with(&pattern, options).map_err(|e| format!("bad pictures path: {e}"))? {
        match entry {
            Ok(path) if path.is_file() => photos.push(path),
            Ok(_) => {}
            Err(e) => log::warn!("skipping {}: {}", e.path().display(), e.error()),
        }
    }
    photos.sort();
    photos.dedup();

    log::debug!("{} {} photo(s) under {}", photos.len(), source, root.display());
    Ok(photos)
}
