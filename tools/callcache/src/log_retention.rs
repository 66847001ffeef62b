use crate::errors::CacheError;
use std::fs;
use std::path::{Path, PathBuf};

const LOG_EXTENSION: &str = "jsonl";

/// Deletes the oldest `.jsonl` files in `dir` until their combined size fits
/// `budget_bytes`. `active` is never deleted, and other files (a SQLite store
/// sharing the directory, for one) are neither counted nor touched.
pub fn enforce_total_budget(
    dir: &Path,
    budget_bytes: u64,
    active: &Path,
) -> Result<Vec<PathBuf>, CacheError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| CacheError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(LOG_EXTENSION))
        .collect::<Vec<_>>();

    files.sort_by(|a, b| {
        let ma = fs::metadata(a).ok().and_then(|m| m.modified().ok());
        let mb = fs::metadata(b).ok().and_then(|m| m.modified().ok());
        ma.cmp(&mb)
    });

    let mut total = files
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files {
        if total <= budget_bytes {
            break;
        }
        if path == active {
            continue;
        }
        let len = fs::metadata(&path)
            .map_err(|e| CacheError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| CacheError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}
