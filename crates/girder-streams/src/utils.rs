use crate::error::{HistoryError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// List subdirectories of `path`, or nothing if it does not exist.
pub(crate) fn read_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    let entries = fs::read_dir(path).map_err(|e| HistoryError::Io(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| HistoryError::Io(e.to_string()))?;
        let entry_path = entry.path();
        if entry_path.is_dir() {
            dirs.push(entry_path);
        }
    }
    Ok(dirs)
}

/// List regular files in `path`, or nothing if it does not exist.
pub(crate) fn read_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let entries = fs::read_dir(path).map_err(|e| HistoryError::Io(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| HistoryError::Io(e.to_string()))?;
        let entry_path = entry.path();
        if entry_path.is_file() {
            files.push(entry_path);
        }
    }
    Ok(files)
}

/// Remove `path` if it is an empty directory. Failures are ignored; this is
/// housekeeping after log deletion, not correctness.
pub(crate) fn cleanup_empty_dir(path: &Path) {
    if let Ok(mut entries) = fs::read_dir(path) {
        if entries.next().is_none() {
            let _ = fs::remove_dir(path);
        }
    }
}

/// Parse the window start (milliseconds) from a `<window_start>.log` name.
pub(crate) fn parse_log_window(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    if path.extension()?.to_str()? != "log" {
        return None;
    }
    stem.parse::<u64>().ok()
}
