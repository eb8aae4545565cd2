//! Writing a merged file list to an output directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use pagestream_shared::{PageStreamError, Result};
use pagestream_source::clean_path;

use crate::merge::{FileContent, SourceFile};

/// Counts reported by [`write_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Files written or rewritten.
    pub written: usize,
    /// Files whose on-disk content already matched.
    pub unchanged: usize,
    /// Entries shadowed by a later entry with the same path.
    pub overridden: usize,
    /// Entries whose path would land outside the output directory.
    pub rejected: usize,
}

/// Write every file to `out_dir`, keyed by its logical path.
///
/// When several entries share a path the last one wins, so filesystem files
/// override generated pages of the same name. Each file is written to a temp
/// sibling and renamed into place. Files already holding identical bytes are
/// left alone.
#[instrument(skip_all, fields(out_dir = %out_dir.display(), files = files.len()))]
pub fn write_files(files: &[SourceFile], out_dir: &Path) -> Result<WriteSummary> {
    let mut summary = WriteSummary::default();

    let mut winners: HashMap<&str, usize> = HashMap::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        if winners.insert(file.path(), index).is_some() {
            summary.overridden += 1;
        }
    }

    std::fs::create_dir_all(out_dir).map_err(|e| PageStreamError::write(out_dir, e))?;

    for (index, file) in files.iter().enumerate() {
        if winners.get(file.path()) != Some(&index) {
            continue;
        }

        let relative = match output_relative_path(file.path()) {
            Ok(relative) => relative,
            Err(e) => {
                warn!(path = %file.path(), error = %e, "refusing to write file");
                summary.rejected += 1;
                continue;
            }
        };

        let target = out_dir.join(&relative);
        let bytes = file.read_bytes().map_err(|e| match file.content() {
            FileContent::Disk(location) => PageStreamError::io(location, e),
            FileContent::Inline(_) => PageStreamError::io(&target, e),
        })?;

        if is_unchanged(&target, &bytes) {
            debug!(path = %relative.display(), "unchanged");
            summary.unchanged += 1;
            continue;
        }

        write_atomic(&target, &bytes)?;
        debug!(path = %relative.display(), size = bytes.len(), "wrote file");
        summary.written += 1;
    }

    info!(
        written = summary.written,
        unchanged = summary.unchanged,
        overridden = summary.overridden,
        rejected = summary.rejected,
        "materialized files"
    );

    Ok(summary)
}

/// Map a logical path to a path relative to the output directory.
///
/// Rooted paths are re-rooted under the output directory. Paths that climb
/// out of it, or name the directory itself, are rejected.
fn output_relative_path(path: &str) -> Result<PathBuf> {
    let cleaned = clean_path(path);
    let relative = cleaned.trim_start_matches('/');

    if relative.is_empty() || relative == "." || relative == ".." || relative.starts_with("../") {
        return Err(PageStreamError::validation(format!(
            "path {path:?} does not name a file inside the output directory"
        )));
    }

    Ok(relative.split('/').collect())
}

fn is_unchanged(target: &Path, bytes: &[u8]) -> bool {
    match std::fs::read(target) {
        Ok(existing) => content_hash(&existing) == content_hash(bytes),
        Err(_) => false,
    }
}

fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| PageStreamError::write(parent, e))?;

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{name}.tmp"));

    std::fs::write(&temp, bytes).map_err(|e| PageStreamError::write(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| PageStreamError::write(target, e))?;
    Ok(())
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
